//! Tracing initialisation from the `logging` config section.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use chainscraper_core::config::LogConfig;

/// Filter directives for `config`: `"info,chainscraper_core=debug"` etc.
pub fn directives(config: &LogConfig, verbose: bool) -> String {
    let mut directives = if verbose { "debug".to_string() } else { config.level.clone() };
    let mut components: Vec<_> = config.components.iter().collect();
    components.sort();
    for (component, level) in components {
        directives.push_str(&format!(",{}={}", component.replace('-', "_"), level));
    }
    directives
}

/// Install the global subscriber. `RUST_LOG` wins over the config file.
/// Call once at startup.
pub fn init(config: &LogConfig, verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directives(config, verbose)))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_overrides_are_appended() {
        let mut config = LogConfig::default();
        config.components.insert("chainscraper-core".into(), "debug".into());
        config.components.insert("chainscraper-steem".into(), "warn".into());
        assert_eq!(
            directives(&config, false),
            "info,chainscraper_core=debug,chainscraper_steem=warn"
        );
        assert!(directives(&config, true).starts_with("debug,"));
    }
}
