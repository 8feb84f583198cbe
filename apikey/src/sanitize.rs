use std::net::{IpAddr, SocketAddr};

/// Strips control characters and surrounding whitespace from `text` and
/// truncates it to at most `max_chars` characters.
pub fn sanitize_text(text: &str, max_chars: usize) -> String {
    text.chars()
        .filter(|c| !c.is_control())
        .collect::<String>()
        .trim()
        .chars()
        .take(max_chars)
        .collect()
}

/// Extracts the host part of a `host:port` remote address.
///
/// Bare IP addresses are accepted as well. Returns `None` for anything that
/// does not contain a valid IP address.
pub fn host_address(address: &str) -> Option<IpAddr> {
    let address = address.trim();
    if let Ok(socket) = address.parse::<SocketAddr>() {
        return Some(socket.ip());
    }

    address.parse::<IpAddr>().ok()
}
