pub fn settable_baud_mask(_port: &str) -> std::io::Result<Option<u32>> {
    Ok(None)
}
