//! Template Files
//!
//! Loading and saving user-authored templates as YAML. This is the only
//! on-disk format the crate knows about; runs themselves are never stored.
//!
//! ```yaml
//! templates:
//!   - name: nightly
//!     description: Nightly quality gate
//!     rollback: step
//!     steps:
//!       - kind: analyze_code
//!       - kind: run_tests
//!         conditions:
//!           - type: score_at_least
//!             threshold: 60
//! ```

use std::fs;
use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::model::WorkflowTemplate;
use crate::error::{FlowError, FlowResult};

/// Top-level shape of a template file.
#[derive(Serialize, Deserialize, Debug, Default)]
struct TemplateFile {
    #[serde(default)]
    templates: Vec<WorkflowTemplate>,
}

/// Parses templates from YAML text.
pub fn parse_templates(yaml: &str) -> FlowResult<Vec<WorkflowTemplate>> {
    let file: TemplateFile = serde_yaml::from_str(yaml)?;
    debug!("Parsed {} templates", file.templates.len());
    Ok(file.templates)
}

/// Loads templates from a YAML file.
///
/// Only the YAML shape is checked here. Whether a template can actually
/// run is decided when a run is started.
///
/// ```rust,no_run
/// use flowgate::workflow::load_templates;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let templates = load_templates("templates.yaml")?;
///     println!("Loaded {} templates", templates.len());
///     Ok(())
/// }
/// ```
pub fn load_templates(path: impl AsRef<Path>) -> FlowResult<Vec<WorkflowTemplate>> {
    let path = path.as_ref();
    info!("Loading templates from: {}", path.display());

    let yaml = fs::read_to_string(path).map_err(|source| FlowError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    debug!("YAML content loaded ({} bytes)", yaml.len());
    parse_templates(&yaml)
}

/// Saves templates to a YAML file, replacing its contents.
pub fn save_templates(templates: &[WorkflowTemplate], path: impl AsRef<Path>) -> FlowResult<()> {
    let path = path.as_ref();
    let file = TemplateFile {
        templates: templates.to_vec(),
    };

    let yaml = serde_yaml::to_string(&file)?;
    fs::write(path, yaml).map_err(|source| FlowError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    info!("Saved {} templates to: {}", templates.len(), path.display());
    Ok(())
}
