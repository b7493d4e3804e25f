pub mod config;
pub mod hls;

pub use config::{parse_str, parser, Config, StreamEntry, SupervisorSection};
pub use hls::{build_hls_args, normalize_config, HlsConfig};
