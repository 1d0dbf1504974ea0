//! Logger initialisation
//!
//! Structured logging goes through the `log` facade; the embedding
//! runtime calls this once at startup. The configured level acts as the
//! default and `RUST_LOG` still wins for targeted debugging.

use env_logger::Builder;
use log::LevelFilter;

pub fn init(level: Option<&str>) {
    let filter = level
        .and_then(|l| l.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info);

    let _ = Builder::from_env(env_logger::Env::default())
        .filter_level(filter)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init(Some("debug"));
        init(Some("nonsense"));
        init(None);
    }
}
