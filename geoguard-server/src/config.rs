use directories::ProjectDirs;
use std::path::PathBuf;
use std::time::Duration;

use geoguard_core::DEFAULT_ALERT_CLASS;

use crate::Cli;

/// None when no home directory can be found
pub fn get_project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "geoguard", "geoguard")
}

/// Directory holding one JSON alert log per vessel
pub fn alert_log_dir(cli: &Cli) -> PathBuf {
    match &cli.data_dir {
        Some(dir) => dir.join("alerts"),
        None => {
            let mut path = match get_project_dirs() {
                Some(dirs) => dirs.data_dir().to_owned(),
                None => PathBuf::from("geoguard-data"),
            };
            path.push("alerts");
            path
        }
    }
}

/// Tunables of the geofence engine
#[derive(Debug, Clone)]
pub struct GeofenceSettings {
    /// Time between two poll cycles
    pub poll_interval: Duration,
    /// How old a vessel position may be and still count
    pub freshness_window: Duration,
    /// Upper bound for one containment query
    pub oracle_timeout: Duration,
    /// Upper bound for one alert log write
    pub store_timeout: Duration,
    /// Alert class for zones configured without one
    pub default_alert_class: String,
    /// Messages buffered per push subscriber before it gets skipped
    pub subscriber_queue: usize,
}

impl Default for GeofenceSettings {
    fn default() -> Self {
        GeofenceSettings {
            poll_interval: Duration::from_secs(30),
            freshness_window: Duration::from_secs(5 * 60),
            oracle_timeout: Duration::from_secs(20),
            store_timeout: Duration::from_secs(10),
            default_alert_class: DEFAULT_ALERT_CLASS.to_owned(),
            subscriber_queue: 64,
        }
    }
}

impl GeofenceSettings {
    pub fn from_cli(cli: &Cli) -> Self {
        GeofenceSettings {
            poll_interval: Duration::from_secs(cli.poll_interval.max(1)),
            freshness_window: Duration::from_secs(cli.freshness_window),
            oracle_timeout: Duration::from_secs(cli.oracle_timeout.max(1)),
            store_timeout: Duration::from_secs(cli.store_timeout.max(1)),
            default_alert_class: cli.default_alert_class.clone(),
            subscriber_queue: cli.subscriber_queue.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_defaults_match_cli_defaults() {
        let cli = Cli::parse_from(["geoguard-server"]);
        let settings = GeofenceSettings::from_cli(&cli);
        let defaults = GeofenceSettings::default();

        assert_eq!(settings.poll_interval, defaults.poll_interval);
        assert_eq!(settings.freshness_window, defaults.freshness_window);
        assert_eq!(settings.oracle_timeout, defaults.oracle_timeout);
        assert_eq!(settings.default_alert_class, "Warning");
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            "geoguard-server",
            "--poll-interval",
            "5",
            "--freshness-window",
            "60",
            "--default-alert-class",
            "Danger",
            "--data-dir",
            "/tmp/geoguard",
        ]);
        let settings = GeofenceSettings::from_cli(&cli);

        assert_eq!(settings.poll_interval, Duration::from_secs(5));
        assert_eq!(settings.freshness_window, Duration::from_secs(60));
        assert_eq!(settings.default_alert_class, "Danger");
        assert_eq!(alert_log_dir(&cli), PathBuf::from("/tmp/geoguard/alerts"));
    }
}
