use env_logger::{Builder, Env};

pub const LOG_ENV: &str = "TOUCHWAKE_LOG";

/// Filter from `TOUCHWAKE_LOG`, `info` when unset.
pub fn init() {
    let env = Env::default().filter_or(LOG_ENV, "info");
    let _ = Builder::from_env(env).format_timestamp_millis().try_init();
}
