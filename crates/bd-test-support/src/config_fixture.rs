use std::io::Write;

use tempfile::NamedTempFile;

/// Writes a throwaway `brickd.toml` fixture and returns the open handle —
/// keep it alive for as long as the path is in use, the file is deleted when
/// it drops.
pub fn write_config_fixture(
    secret: Option<&str>,
    plain_port: u16,
    websocket_port: u16,
) -> NamedTempFile {
    // An absent key deserializes to `None` in the `Raw*Config` tree; a null
    // secret is expressed by omitting the key, not by an empty string.
    let secret_line = match secret {
        Some(s) => format!("secret = \"{s}\"\n"),
        None => String::new(),
    };
    let contents = format!(
        "[authentication]\n{secret_line}\n\
         [listen]\n\
         address = \"127.0.0.1\"\n\
         plain_port = {plain_port}\n\
         websocket_port = {websocket_port}\n\
         dual_stack = false\n\n\
         [poll_delay]\n\
         spi_micros = 1000\n\
         rs485_micros = 1000\n"
    );
    let mut file = NamedTempFile::new().expect("tempfile creation should not fail in tests");
    file.write_all(contents.as_bytes()).expect("writing fixture contents should not fail");
    file.flush().expect("flush should not fail");
    file
}
