use std::error::Error;
use std::sync::OnceLock;

use ini::Ini;

use crate::utils::types::Address;

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Node configuration, read once at startup from the `[dht]` section of
/// an ini file. All keys are required.
#[derive(Debug, Clone)]
pub struct Config {
    /// m, bits of identifier space
    pub finger_table_sz: u32,
    /// bound on the iterative lookup loop
    pub max_steps: u32,
    /// size of the successor list
    pub max_succ: usize,
    /// seconds between maintenance ticks
    pub fix_interval: u64,
    /// host:port of the peer RPC service
    pub listen_address: Address,
    /// host:port of the client API
    pub api_address: Address,
}

impl Config {
    pub fn load(path: &str) -> Result<Config, Box<dyn Error>> {
        let ini = Ini::load_from_file(path)?;
        let section = ini
            .section(Some("dht"))
            .ok_or(format!("missing [dht] section in {}", path))?;

        let get = |key: &str| -> Result<String, Box<dyn Error>> {
            match section.get(key) {
                Some(value) => Ok(value.to_string()),
                None => Err(format!("missing key '{}' in [dht] section", key).into()),
            }
        };

        Ok(Config {
            finger_table_sz: get("finger_table_sz")?.parse()?,
            max_steps: get("max_steps")?.parse()?,
            max_succ: get("max_succ")?.parse()?,
            fix_interval: get("fix_interval")?.parse()?,
            listen_address: get("listen_address")?,
            api_address: get("api_address")?,
        })
    }

    pub fn install(self) -> Result<(), Box<dyn Error>> {
        CONFIG.set(self).map_err(|_| "config already installed".into())
    }

    pub fn global() -> &'static Config {
        CONFIG.get().expect("config not installed, call Config::install first")
    }
}

#[cfg(test)]
pub(crate) fn install_test_config() {
    let _ = CONFIG.set(Config {
        finger_table_sz: 64,
        max_steps: 32,
        max_succ: 4,
        fix_interval: 2,
        listen_address: "127.0.0.1:5601".to_string(),
        api_address: "127.0.0.1:5501".to_string(),
    });
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn loads_a_complete_dht_section() {
        let mut file = tempfile_path("chord_config_ok.ini");
        write!(
            file.1,
            "[dht]\nfinger_table_sz = 64\nmax_steps = 32\nmax_succ = 4\nfix_interval = 2\n\
             listen_address = 127.0.0.1:5601\napi_address = 127.0.0.1:5501\n"
        )
        .unwrap();

        let config = Config::load(&file.0).unwrap();
        assert_eq!(config.finger_table_sz, 64);
        assert_eq!(config.max_steps, 32);
        assert_eq!(config.max_succ, 4);
        assert_eq!(config.fix_interval, 2);
        assert_eq!(config.listen_address, "127.0.0.1:5601");
        assert_eq!(config.api_address, "127.0.0.1:5501");
    }

    #[test]
    fn rejects_a_section_with_missing_keys() {
        let mut file = tempfile_path("chord_config_missing.ini");
        write!(file.1, "[dht]\nfinger_table_sz = 64\n").unwrap();
        assert!(Config::load(&file.0).is_err());
    }

    fn tempfile_path(name: &str) -> (String, std::fs::File) {
        let path = std::env::temp_dir().join(name);
        let file = std::fs::File::create(&path).unwrap();
        (path.to_string_lossy().to_string(), file)
    }
}
