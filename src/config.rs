//! CLI arguments and server configuration defaults.

use clap::Parser;
use shadow_rs::formatcp;

use crate::build;

const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_PROFILES_DIR: &str = "profiles";
pub const DEFAULT_IMAGES_DIR: &str = "images";
pub const DEFAULT_MAX_UPLOAD_SIZE: usize = 10 * 1024 * 1024;
pub const SHUTDOWN_GRACE_SECS: u64 = 10;

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "profile-drive",
    version = VERSION_INFO,
    about = "Character profile storage server"
)]
pub struct Args {
    #[arg(
        short = 'b',
        long,
        env = "PROFILE_BIND",
        default_value = "0.0.0.0",
        help = "Bind address"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "PORT",
        default_value_t = DEFAULT_PORT,
        help = "HTTP port"
    )]
    pub port: u16,
    #[arg(
        long,
        env = "PROFILE_PROFILES_DIR",
        default_value = DEFAULT_PROFILES_DIR,
        help = "Directory holding one JSON file per profile"
    )]
    pub profiles_dir: String,
    #[arg(
        long,
        env = "PROFILE_IMAGES_DIR",
        default_value = DEFAULT_IMAGES_DIR,
        help = "Directory holding uploaded profile images"
    )]
    pub images_dir: String,
    #[arg(
        long,
        env = "PROFILE_PUBLIC_URL",
        help = "Base URL for image links (derived from the request when unset)"
    )]
    pub public_url: Option<String>,
    #[arg(
        long,
        env = "PROFILE_MAX_UPLOAD_SIZE",
        default_value_t = DEFAULT_MAX_UPLOAD_SIZE,
        help = "Max upload request size in bytes"
    )]
    pub max_upload_size: usize,
    #[arg(long, env = "PROFILE_CORS_ORIGINS", help = "Comma separated CORS origins")]
    pub cors_origins: Option<String>,
}
