//! Error types for airsnare-wireless

use thiserror::Error;

/// Result type alias for wireless operations
pub type Result<T> = std::result::Result<T, WirelessError>;

/// Main error type for wireless operations
#[derive(Error, Debug)]
pub enum WirelessError {
    /// Interface not found or invalid
    #[error("Interface error: {0}")]
    Interface(String),

    /// Interface exists but is administratively down
    #[error("Interface not up: {0}")]
    InterfaceDown(String),

    /// Monitor mode operation failed
    #[error("Monitor mode error: {0}")]
    MonitorMode(String),

    /// Channel setting failed
    #[error("Channel error: {0}")]
    Channel(String),

    /// Channel number outside of any supported band
    #[error("{0} is not a valid wifi channel")]
    InvalidChannel(u32),

    /// Packet injection failed
    #[error("Injection error: {0}")]
    Injection(String),

    /// Packet capture failed
    #[error("Capture error: {0}")]
    Capture(String),

    /// Socket operation failed
    #[error("Socket error: {0}")]
    Socket(String),

    /// Insufficient privileges
    #[error("Permission denied: {0}")]
    Permission(String),

    /// Invalid MAC address
    #[error("Invalid MAC address: {0}")]
    InvalidMac(String),

    /// Invalid frame format
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Replay file missing, unreadable or not a radiotap capture
    #[error("Source file error: {0}")]
    SourceFile(String),

    /// Invalid parameter or command
    #[error("Configuration error: {0}")]
    Config(String),

    /// Referenced station is not in the registry
    #[error("Could not find station {0}")]
    NotFound(String),

    /// Recon already started
    #[error("wifi recon is already running")]
    AlreadyRunning,

    /// Operation requires recon to be running
    #[error("wifi recon is not running")]
    NotRunning,

    /// Rogue access point already beaconing
    #[error("rogue access point already started")]
    RogueApActive,

    /// System/OS error
    #[error("System error: {0}")]
    System(String),

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Driver or hardware doesn't support operation
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl WirelessError {
    /// Create an interface error
    pub fn interface(msg: impl Into<String>) -> Self {
        Self::Interface(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a socket error
    pub fn socket(msg: impl Into<String>) -> Self {
        Self::Socket(msg.into())
    }

    /// Check if the failure is the recoverable "interface down" activation case
    pub fn is_interface_down(&self) -> bool {
        matches!(self, Self::InterfaceDown(_))
    }

    /// Check if this error stems from bad operator input rather than hardware
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidMac(_)
                | Self::InvalidChannel(_)
                | Self::SourceFile(_)
                | Self::Config(_)
                | Self::NotFound(_)
                | Self::Interface(_)
        )
    }

    /// Check if this is a permission error
    pub fn is_permission_error(&self) -> bool {
        matches!(self, Self::Permission(_))
    }
}

impl From<nix::Error> for WirelessError {
    fn from(err: nix::Error) -> Self {
        match err {
            nix::Error::EPERM | nix::Error::EACCES => {
                Self::Permission(format!("Operation not permitted: {}", err))
            }
            nix::Error::ENODEV | nix::Error::ENOENT => {
                Self::Interface(format!("Interface not found: {}", err))
            }
            nix::Error::ENETDOWN => Self::InterfaceDown(format!("Network is down: {}", err)),
            nix::Error::EBUSY => Self::Interface(format!("Interface busy: {}", err)),
            nix::Error::EOPNOTSUPP => {
                Self::Unsupported(format!("Operation not supported: {}", err))
            }
            _ => Self::System(format!("System error: {}", err)),
        }
    }
}
