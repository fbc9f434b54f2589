/// Capture, discovery and handshake events
pub const T_WIFI: &str = "wifi";
