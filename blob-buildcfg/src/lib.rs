//! Exports configuration data from the build system

pub const BLOB_CLIENT_PKG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION_MAJOR"),
    ".",
    env!("CARGO_PKG_VERSION_MINOR"),
);
pub const BLOB_CLIENT_PKG_RELEASE: &str = env!("CARGO_PKG_VERSION_PATCH");
pub const BLOB_CLIENT_PKG_REPOID: &str = env!("REPOID");

#[macro_export]
macro_rules! configdir {
    ($subdir:expr) => {
        concat!("/etc/blob-client", $subdir)
    };
}

/// Default path for the client-side configuration file, if one is used by a caller.
pub const BLOB_CLIENT_CONFIG_FN: &str = configdir!("/client.conf");
