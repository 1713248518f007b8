use super::types::*;
use crate::config::env::{expand_env_refs, UnsetEnvVars};
use crate::config::expand_tilde;
use crate::pipeline::{PipelineIdentity, SinkKind, SourceKind};
use crate::source::template::{QueryTemplate, TemplateError, TimeFormat};
use std::fs::File;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    UnsetEnv(#[from] UnsetEnvVars),

    #[error("invalid query template: {0}")]
    Template(#[from] TemplateError),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Read, expand and validate the config file at `path`.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    use std::io::Read;

    let mut file = File::open(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to open config file '{}': {}", path.display(), e),
        ))
    })?;

    let mut yaml_string = String::new();
    file.read_to_string(&mut yaml_string).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    parse_config_str(&yaml_string).map_err(|e| match e {
        ConfigError::YamlParse(e) => ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("in file '{}': {}", path.display(), e),
        )),
        other => other,
    })
}

/// Parse and validate config from YAML text.
pub fn parse_config_str(yaml: &str) -> Result<Config, ConfigError> {
    // Secrets are usually supplied as $env{VAR} references
    let yaml_string = expand_env_refs(yaml)?;

    let mut config: Config = serde_yaml::from_str(&yaml_string)?;
    expand_paths(&mut config);
    validate_config(&config)?;

    Ok(config)
}

/// Expands tilde (~) in all PathBuf fields in the config.
fn expand_paths(config: &mut Config) {
    let general = &mut config.general;
    general.state_file_path = expand_tilde(&general.state_file_path);
    if let Some(dir) = general.scratch_dir.as_mut() {
        *dir = expand_tilde(dir);
    }
    if let Some(path) = general.log_file_path.as_mut() {
        *path = expand_tilde(path);
    }

    if let Some(local) = config.sinks.local_file.as_mut() {
        local.base_path = expand_tilde(&local.base_path);
    }
    if let Some(kerberos) = config
        .sinks
        .hdfs
        .as_mut()
        .and_then(|hdfs| hdfs.kerberos.as_mut())
    {
        kerberos.keytab_path = expand_tilde(&kerberos.keytab_path);
    }
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if config.general.collection_window_minutes == 0 {
        errors.push("general.collection_window_minutes must be greater than zero".to_string());
    }
    if config.general.state_file_path.as_os_str().is_empty() {
        errors.push("general.state_file_path cannot be empty".to_string());
    }

    match config.pipeline.parse::<PipelineIdentity>() {
        Ok(identity) => {
            validate_source(config, identity.source, &mut errors);
            validate_sink(config, identity.sink, &mut errors);
        }
        Err(e) => errors.push(format!("pipeline: {}", e)),
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}

fn validate_source(config: &Config, kind: SourceKind, errors: &mut Vec<String>) {
    match kind {
        SourceKind::CortexXdr => match &config.sources.cortex_xdr {
            None => errors.push(
                "pipeline names source 'cortex_xdr' but sources.cortex_xdr is not configured"
                    .to_string(),
            ),
            Some(xdr) => {
                let prefix = "sources.cortex_xdr";
                if xdr.api_base_url().is_none() {
                    errors.push(format!("{}: either fqdn or base_url is required", prefix));
                }
                if xdr.api_key_id.is_empty() || xdr.api_key.is_empty() {
                    errors.push(format!("{}: api_key_id and api_key are required", prefix));
                }
                if xdr.category.is_empty() {
                    errors.push(format!("{}: category cannot be empty", prefix));
                }
                validate_template(prefix, "query_template", &xdr.query_template, &xdr.time_format, errors);
                validate_collection(prefix, &xdr.collection, errors);
            }
        },
        SourceKind::Qradar => match &config.sources.qradar {
            None => errors.push(
                "pipeline names source 'qradar' but sources.qradar is not configured".to_string(),
            ),
            Some(qradar) => {
                let prefix = "sources.qradar";
                if qradar.host.is_empty() {
                    errors.push(format!("{}: host is required", prefix));
                }
                if qradar.token.is_empty() {
                    errors.push(format!("{}: token is required", prefix));
                }
                let (field, template) = match qradar.input_type {
                    QradarInputType::ApiEvents => (
                        "aql_query_template_events",
                        qradar.aql_query_template_events.as_ref(),
                    ),
                    QradarInputType::ApiOffenses => (
                        "offense_filter_template",
                        qradar.offense_filter_template.as_ref(),
                    ),
                    QradarInputType::Syslog => {
                        errors.push(format!(
                            "{}: input_type 'syslog' is push-based and cannot be collected by query",
                            prefix
                        ));
                        return;
                    }
                };
                match template {
                    Some(text) => validate_template(prefix, field, text, &qradar.time_format, errors),
                    None => errors.push(format!(
                        "{}: {} is required for input_type '{}'",
                        prefix,
                        field,
                        qradar.input_type.as_str()
                    )),
                }
                validate_collection(prefix, &qradar.collection, errors);
            }
        },
    }
}

fn validate_template(
    prefix: &str,
    field: &str,
    text: &str,
    format: &TimeFormat,
    errors: &mut Vec<String>,
) {
    if let Err(e) = QueryTemplate::new(text, format.clone()) {
        errors.push(format!("{}.{}: {}", prefix, field, e));
    }
}

fn validate_collection(prefix: &str, collection: &CollectionConfig, errors: &mut Vec<String>) {
    if collection.poll_interval.is_zero() {
        errors.push(format!("{}: poll_interval must be greater than zero", prefix));
    }
    if collection.request_timeout.is_zero() {
        errors.push(format!("{}: request_timeout must be greater than zero", prefix));
    }
}

fn validate_sink(config: &Config, kind: SinkKind, errors: &mut Vec<String>) {
    match kind {
        SinkKind::LocalFile => match &config.sinks.local_file {
            None => errors.push(
                "pipeline names sink 'local_file' but sinks.local_file is not configured"
                    .to_string(),
            ),
            Some(local) => {
                if local.base_path.as_os_str().is_empty() {
                    errors.push("sinks.local_file: base_path cannot be empty".to_string());
                }
                validate_capacity("sinks.local_file", &local.capacity, errors);
            }
        },
        SinkKind::Hdfs => match &config.sinks.hdfs {
            None => errors.push(
                "pipeline names sink 'hdfs' but sinks.hdfs is not configured".to_string(),
            ),
            Some(hdfs) => {
                if hdfs.namenode_url.is_empty() {
                    errors.push("sinks.hdfs: namenode_url is required".to_string());
                }
                if hdfs.base_paths.is_empty() {
                    errors.push(
                        "sinks.hdfs: base_paths must map at least one 'source/category'".to_string(),
                    );
                }
                for key in hdfs.base_paths.keys() {
                    if key.split('/').count() != 2 {
                        errors.push(format!(
                            "sinks.hdfs.base_paths: key '{}' must have the form 'source/category'",
                            key
                        ));
                    }
                }
                validate_capacity("sinks.hdfs", &hdfs.capacity, errors);
            }
        },
    }
}

fn validate_capacity(prefix: &str, capacity: &CapacityConfig, errors: &mut Vec<String>) {
    if capacity.max_records_per_file == 0 {
        errors.push(format!("{}: max_records_per_file must be greater than zero", prefix));
    }
    if capacity.max_file_size_mb == 0 {
        errors.push(format!("{}: max_file_size_mb must be greater than zero", prefix));
    }
}
