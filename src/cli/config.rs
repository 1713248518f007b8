use crate::config::generate::generate_starter_config;
use crate::config::{user_config_path, SYSTEM_CONFIG_PATH};
use std::fs;
use std::path::{Path, PathBuf};

pub fn init(stdout: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config_content = generate_starter_config();

    if stdout {
        print!("{}", config_content);
        return Ok(());
    }

    // Try ~/.config/sdc/config.yml first, /etc/sdc/config.yml otherwise
    let config_path = match user_config_path() {
        Some(user_config) => match user_config.parent().map(fs::create_dir_all) {
            Some(Err(_)) => {
                eprintln!(
                    "Warning: Could not create directory for {}",
                    user_config.display()
                );
                eprintln!("Falling back to {}", SYSTEM_CONFIG_PATH);
                PathBuf::from(SYSTEM_CONFIG_PATH)
            }
            _ => user_config,
        },
        None => PathBuf::from(SYSTEM_CONFIG_PATH),
    };

    write_new_config(&config_path, &config_content)?;
    println!("Config file written to {}", config_path.display());
    Ok(())
}

/// Write a config file, refusing to replace an existing one.
pub fn write_new_config(path: &Path, content: &str) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() {
        return Err(format!(
            "Config file already exists at {}\nRemove it first or use --stdout to print the config",
            path.display()
        )
        .into());
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    Ok(())
}

pub fn validate(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let path = config_path.ok_or("No config file found. Use --config to specify a path.")?;

    println!("Validating config file: {}", path.display());

    let config = crate::config::load_config(&path)?;
    println!("✓ Config is valid (pipeline: {})", config.pipeline);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_new_config_refuses_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/config.yml");

        write_new_config(&path, "pipeline: x\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "pipeline: x\n");

        let err = write_new_config(&path, "pipeline: y\n").unwrap_err();
        assert!(err.to_string().contains("already exists"));
        assert_eq!(fs::read_to_string(&path).unwrap(), "pipeline: x\n");
    }
}
