//! registrar configs

pub mod cli {
    //! Parse from either cli or env var

    /// tokio worker thread name
    pub static DEFAULT_THREAD_NAME: &str = "registrar-worker";
    /// default log level. Can use this argument or REGISTRAR_LOG env var
    pub const DEFAULT_REGISTRAR_LOG: &str = "info";
    /// log as "json", "pretty" or "standard" (unstructured)
    pub static DEFAULT_LOG_FORMAT: &str = "standard";

    use std::{path::PathBuf, time::Duration};

    use anyhow::{Context, Result};
    pub use clap::Parser;
    use clap::Subcommand;
    use server_registry::RegistryConfig;

    #[derive(Parser, Debug, Clone, PartialEq, Eq)]
    #[clap(author, name = "registrar", bin_name = "registrar", about, long_about = None)]
    /// announce this server in, or list servers from, a zookeeper registry.
    /// registrar will load `.env` in the working dir as well
    pub struct Config {
        /// path to a registry config file (yaml or json). flags below override it
        #[clap(short, long, value_parser, env)]
        pub config_path: Option<PathBuf>,
        /// comma separated zookeeper `host:port` list
        #[clap(long, env, value_parser)]
        pub connect_string: Option<String>,
        /// session timeout in milliseconds, also bounds the initial connect
        #[clap(long, env, value_parser)]
        pub session_timeout_ms: Option<u64>,
        /// node the server entries live under
        #[clap(long, env, value_parser)]
        pub root_path: Option<String>,
        /// Worker thread name
        #[clap(long, env, value_parser, default_value = DEFAULT_THREAD_NAME)]
        pub thread_name: String,
        /// number of worker threads, defaults to the number of cpus
        #[clap(long, env, value_parser)]
        pub threads: Option<usize>,
        /// set the log level. All valid RUST_LOG arguments are accepted
        #[clap(long, env, value_parser, default_value = DEFAULT_REGISTRAR_LOG)]
        pub registrar_log: String,
        /// log output format: standard, json or pretty
        #[clap(long, env, value_parser, default_value = DEFAULT_LOG_FORMAT)]
        pub log_format: String,
        #[clap(subcommand)]
        pub command: Command,
    }

    #[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
    pub enum Command {
        /// register this server and stay registered until ctrl-c
        Announce {
            /// payload published for this server, e.g. "10.0.0.7:9090"
            info: String,
            /// re-register if the entry disappears, checking this often (at least 1)
            #[clap(long, env, value_parser = clap::value_parser!(u64).range(1..))]
            check_interval_secs: Option<u64>,
        },
        /// print every registered server
        List,
    }

    impl Config {
        /// Build the registry config: file (or defaults), then cli overrides
        pub fn registry_config(&self) -> Result<RegistryConfig> {
            let mut config = match &self.config_path {
                Some(path) => RegistryConfig::parse(path)?,
                None => RegistryConfig::default(),
            };
            if let Some(connect_string) = &self.connect_string {
                config.connect_string = connect_string.clone();
            }
            if let Some(ms) = self.session_timeout_ms {
                config.session_timeout = Duration::from_millis(ms);
            }
            if let Some(root_path) = &self.root_path {
                config.root_path = root_path.clone();
            }
            config
                .validate()
                .context("invalid registry configuration")?;
            Ok(config)
        }
    }
}

pub mod trace {
    //! tracing configuration
    use anyhow::Result;
    use tracing_subscriber::{
        filter::EnvFilter,
        fmt::{
            self,
            format::{Format, PrettyFields},
        },
        prelude::__tracing_subscriber_SubscriberExt,
        util::SubscriberInitExt,
    };

    /// Installed logging setup
    #[derive(Debug)]
    pub struct Config {
        /// formatting to apply to logs
        pub log_frmt: String,
    }

    impl Config {
        /// Install the global subscriber
        pub fn parse(registrar_log: &str, log_frmt: &str) -> Result<Self> {
            // Log level comes from REGISTRAR_LOG
            let filter = EnvFilter::try_new(registrar_log)
                .or_else(|_| EnvFilter::try_new("info"))?
                .add_directive("zookeeper=warn".parse()?);

            match log_frmt {
                "json" => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(fmt::layer().json())
                        .init();
                }
                "pretty" => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(
                            fmt::layer()
                                .event_format(
                                    Format::default().pretty().with_source_location(false),
                                )
                                .fmt_fields(PrettyFields::new()),
                        )
                        .init();
                }
                _ => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(fmt::layer())
                        .init();
                }
            }

            Ok(Self {
                log_frmt: log_frmt.to_owned(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{io::Write, time::Duration};

    use super::cli::{Command, Config, Parser};

    #[test]
    fn test_parse_announce() {
        let config = Config::try_parse_from([
            "registrar",
            "--connect-string",
            "zk1:2181",
            "--session-timeout-ms",
            "3000",
            "announce",
            "10.0.0.7:9090",
            "--check-interval-secs",
            "10",
        ])
        .unwrap();
        assert_eq!(
            config.command,
            Command::Announce {
                info: "10.0.0.7:9090".into(),
                check_interval_secs: Some(10),
            }
        );

        let registry = config.registry_config().unwrap();
        assert_eq!(registry.connect_string, "zk1:2181");
        assert_eq!(registry.session_timeout, Duration::from_millis(3000));
        assert_eq!(registry.root_path, "/servers");
    }

    #[test]
    fn test_cli_overrides_file() {
        let path = std::env::temp_dir().join(format!("registrar-test-{}.yaml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "connect_string: \"from-file:2181\"\nroot_path: /from/file").unwrap();

        let config = Config::try_parse_from([
            "registrar",
            "--config-path",
            path.to_str().unwrap(),
            "--root-path",
            "/from/cli",
            "list",
        ])
        .unwrap();
        let registry = config.registry_config().unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.command, Command::List);
        assert_eq!(registry.connect_string, "from-file:2181");
        assert_eq!(registry.root_path, "/from/cli");
    }

    #[test]
    fn test_invalid_root_rejected() {
        let config =
            Config::try_parse_from(["registrar", "--root-path", "servers", "list"]).unwrap();
        assert!(config.registry_config().is_err());
    }

    #[test]
    fn test_zero_check_interval_rejected() {
        assert!(
            Config::try_parse_from(["registrar", "announce", "x", "--check-interval-secs", "0"])
                .is_err()
        );
        let config =
            Config::try_parse_from(["registrar", "announce", "x", "--check-interval-secs", "1"])
                .unwrap();
        assert_eq!(
            config.command,
            Command::Announce {
                info: "x".into(),
                check_interval_secs: Some(1),
            }
        );
    }
}
