use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, error, info};

use crate::gallery::config::Config;
use crate::gallery::runner::Runner;

/// The name of the cargo package.
const NAME: &str = env!("CARGO_PKG_NAME");

/// The version of the cargo package.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Owns one run: cookie loading, runner construction, target processing.
pub(crate) struct Program {
    config: Config,
    config_dir: PathBuf,
}

impl Program {
    pub(crate) fn new(config: Config, config_dir: PathBuf) -> Self {
        Self { config, config_dir }
    }

    /// Runs the matcher over the given input paths and returns the process
    /// exit code.
    pub(crate) async fn run(&self, inputs: &[PathBuf]) -> i32 {
        debug!("{NAME} {VERSION}");

        let ex_cookie_string = self.read_cookie_string();
        let runner = match Runner::new(self.config.clone(), ex_cookie_string) {
            Ok(runner) => runner,
            Err(e) => {
                error!("Failed to initialize: {e}");
                return 1;
            }
        };
        runner.run(inputs).await
    }

    /// The exhentai cookie string, when a cookie file is configured and
    /// readable. The file name resolves relative to the config file.
    fn read_cookie_string(&self) -> Option<String> {
        let file_name = self.config.lookup.ex_cookies_file_name.as_deref()?;
        let path = self.config_dir.join(file_name);
        match fs::read_to_string(&path) {
            Ok(content) => {
                let content = content.trim().to_string();
                (!content.is_empty()).then_some(content)
            }
            Err(_) => {
                info!("Failed to read cookie file: {file_name}");
                None
            }
        }
    }
}

/// Resolves the config file location: the override environment variable
/// when set, `config.toml` in the working directory otherwise.
pub(crate) fn config_path() -> PathBuf {
    std::env::var_os("GALLERY_TAGGER_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| Path::new("config.toml").to_path_buf())
}
