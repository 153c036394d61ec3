//! `flowtally config` command handler

use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tracing::info;

use flowtally_core::config::FlowtallyConfig;

use crate::cli::{ConfigAction, ConfigArgs};
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Execute the `config` command.
pub async fn execute(
    args: ConfigArgs,
    config_path: &Path,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    match args.action {
        ConfigAction::Validate => execute_validate(config_path, writer).await,
        ConfigAction::Show { section } => execute_show(config_path, section, writer).await,
    }
}

/// Execute the config validate subcommand.
///
/// # Errors
///
/// Returns `CliError::Config` if validation fails (parse errors, invalid values,
/// address mode without a filter address).
async fn execute_validate(config_path: &Path, writer: &OutputWriter) -> Result<(), CliError> {
    info!(path = %config_path.display(), "validating configuration");

    let report = match FlowtallyConfig::load(config_path).await {
        Ok(config) => ConfigValidationReport {
            source: config_path.display().to_string(),
            valid: true,
            errors: Vec::new(),
            effective: Some(EffectiveProbe::from_config(&config)),
        },
        Err(e) => ConfigValidationReport {
            source: config_path.display().to_string(),
            valid: false,
            errors: vec![e.to_string()],
            effective: None,
        },
    };

    writer.render(&report)?;

    if !report.valid {
        return Err(CliError::Config("configuration is invalid".to_owned()));
    }

    Ok(())
}

/// Execute the config show subcommand.
///
/// Loads and displays the effective configuration (file + env overrides + defaults).
///
/// # Errors
///
/// Returns `CliError::Core` if loading fails or `CliError::Command` if the section name is unknown.
async fn execute_show(
    config_path: &Path,
    section: Option<String>,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    info!(path = %config_path.display(), "loading configuration");

    let config = FlowtallyConfig::load(config_path).await?;
    let report = build_config_report(&config, config_path, section)?;
    writer.render(&report)?;

    Ok(())
}

fn build_config_report(
    config: &FlowtallyConfig,
    config_path: &Path,
    section: Option<String>,
) -> Result<ConfigReport, CliError> {
    let (config_toml, config_json) = match section.as_deref() {
        None => serialize_section(config)?,
        Some("general") => serialize_section(&config.general)?,
        Some("probe") => serialize_section(&config.probe)?,
        Some(other) => {
            return Err(CliError::Command(format!(
                "unknown section: {} (expected: general, probe)",
                other
            )));
        }
    };

    Ok(ConfigReport {
        source: config_path.display().to_string(),
        section,
        config: config_json,
        config_toml,
    })
}

fn serialize_section<T: Serialize>(value: &T) -> Result<(String, serde_json::Value), CliError> {
    let toml = toml::to_string_pretty(value)
        .unwrap_or_else(|e| format!("(serialization error: {})", e));
    Ok((toml, serde_json::to_value(value)?))
}

/// Configuration display report.
///
/// Text output prints `config_toml`; JSON output carries `config`.
#[derive(Debug, Serialize)]
pub struct ConfigReport {
    /// Configuration file path
    pub source: String,
    /// Optional section name (None = full config)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    /// Effective configuration values
    pub config: serde_json::Value,
    /// Serialized TOML configuration
    #[serde(skip)]
    pub config_toml: String,
}

impl Render for ConfigReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        if let Some(ref section) = self.section {
            let section_label = format!("[{}]", section);
            writeln!(
                w,
                "Configuration {} (source: {})",
                section_label.bold(),
                self.source
            )?;
        } else {
            writeln!(w, "Configuration (source: {})", self.source.bold())?;
        }

        writeln!(w)?;
        write!(w, "{}", self.config_toml)?;

        Ok(())
    }
}

/// Table settings after mode defaults are applied.
#[derive(Debug, Serialize)]
pub struct EffectiveProbe {
    pub mode: String,
    pub capacity: usize,
    pub policy: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_address: Option<String>,
}

impl EffectiveProbe {
    fn from_config(config: &FlowtallyConfig) -> Self {
        Self {
            mode: config.probe.mode.to_string(),
            capacity: config.probe.effective_capacity(),
            policy: config.probe.effective_policy().to_string(),
            filter_address: config.probe.filter_address.map(|a| a.to_string()),
        }
    }
}

/// Configuration validation report.
#[derive(Serialize)]
pub struct ConfigValidationReport {
    /// Configuration file path
    pub source: String,
    /// Whether the configuration is valid
    pub valid: bool,
    /// Validation error messages (empty if valid)
    pub errors: Vec<String>,
    /// Resolved table settings (only when valid)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective: Option<EffectiveProbe>,
}

impl Render for ConfigValidationReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(w, "Config Validation: {}", self.source.bold())?;

        if self.valid {
            writeln!(w, "  Result: {}", "VALID".green().bold())?;
        } else {
            writeln!(w, "  Result: {}", "INVALID".red().bold())?;
            for err in &self.errors {
                writeln!(w, "  Error: {}", err.red())?;
            }
        }

        if let Some(ref probe) = self.effective {
            writeln!(
                w,
                "  Table: mode={} capacity={} policy={}",
                probe.mode, probe.capacity, probe.policy
            )?;
            if let Some(ref addr) = probe.filter_address {
                writeln!(w, "  Filter: {}", addr)?;
            }
        }

        Ok(())
    }
}
