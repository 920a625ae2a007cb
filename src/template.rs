//! Template System - Reusable Presentation Templates
//!
//! A template archive (`.sfxt`) holds the presentation skeleton, the slide
//! fragments and `template-config.json` describing them.

use std::collections::HashSet;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::{relative_path, Engine, EngineCore, EngineError};
use crate::variables::{encode_base64, Variable};

pub const TEMPLATE_ARCHIVE_EXTENSION: &str = "sfxt";
pub const TEMPLATE_CONFIGURATION_FILENAME: &str = "template-config.json";

pub type SlideTemplateId = i32;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateConfiguration {
    pub name: String,
    pub version: Option<String>,
    pub file: Option<PathBuf>,
    pub js_object: String,
    pub resources_directory: Option<PathBuf>,
    pub default_variables: Vec<Variable>,
    pub slides_container: String,
    pub slide_id_prefix: String,
    pub slides_template_directory: Option<PathBuf>,
    pub slides_presentation_directory: Option<PathBuf>,
    pub slides_thumbnail_directory: Option<PathBuf>,
    pub slide_templates: Vec<SlideTemplate>,
}

impl TemplateConfiguration {
    pub fn slide_template(&self, id: SlideTemplateId) -> Option<&SlideTemplate> {
        self.slide_templates.iter().find(|t| t.id == id)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlideTemplate {
    pub id: SlideTemplateId,
    pub name: String,
    pub file: Option<PathBuf>,
    pub dynamic_attributes: Vec<DynamicAttribute>,
    pub elements: Vec<SlideElementTemplate>,
}

impl SlideTemplate {
    pub fn element(&self, id: i32) -> Option<&SlideElementTemplate> {
        self.elements.iter().find(|e| e.id == id)
    }
}

/// Attribute whose value is asked when a slide is created from the template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DynamicAttribute {
    pub attribute: String,
    #[serde(default)]
    pub prompt_message: String,
    pub template_expression: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SlideElementTemplate {
    pub id: i32,
    pub html_id: String,
    #[serde(default)]
    pub default_content: String,
}

// --- Document structs (template-config.json) ---

#[derive(Debug, Serialize, Deserialize)]
struct TemplateDocument {
    template: TemplateSection,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct TemplateSection {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    file: String,
    #[serde(default)]
    js_object: String,
    #[serde(default)]
    resources_directory: String,
    #[serde(default)]
    default_variables: Vec<VariableEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    slides: Option<SlidesSection>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct VariableEntry {
    pub(crate) name: String,
    pub(crate) value: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct SlidesSection {
    #[serde(default)]
    configuration: SlidesConfigurationEntry,
    #[serde(default)]
    slides_definition: Vec<SlideDefinitionEntry>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct SlidesConfigurationEntry {
    #[serde(default)]
    slides_container: String,
    #[serde(default)]
    slide_id_prefix: String,
    #[serde(default)]
    template_directory: String,
    #[serde(default)]
    presentation_directory: String,
    #[serde(default)]
    thumbnail_directory: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct SlideDefinitionEntry {
    #[serde(default = "default_slide_id")]
    id: SlideTemplateId,
    #[serde(default)]
    name: String,
    #[serde(default)]
    file: String,
    #[serde(default)]
    dynamic_attributes: Vec<DynamicAttribute>,
    #[serde(default)]
    elements: Vec<SlideElementTemplate>,
}

fn default_slide_id() -> SlideTemplateId { -1 }

fn resolve(base: &Path, relative: &str) -> Option<PathBuf> {
    if relative.is_empty() {
        None
    } else {
        Some(base.join(relative))
    }
}

pub(crate) fn decode_variables(entries: Vec<VariableEntry>) -> Result<Vec<Variable>, EngineError> {
    entries
        .into_iter()
        .map(|entry| Variable::from_base64(entry.name, &entry.value))
        .collect()
}

pub(crate) fn encode_variables(variables: &[Variable]) -> Vec<VariableEntry> {
    variables
        .iter()
        .map(|v| VariableEntry {
            name: v.name.clone(),
            value: encode_base64(&v.value),
        })
        .collect()
}

/// Engine for `.sfxt` template archives.
#[derive(Debug)]
pub struct TemplateEngine {
    core: EngineCore,
    configuration: Option<TemplateConfiguration>,
}

impl TemplateEngine {
    pub fn new() -> Self {
        Self {
            core: EngineCore::new(TEMPLATE_ARCHIVE_EXTENSION, TEMPLATE_CONFIGURATION_FILENAME),
            configuration: None,
        }
    }

    fn relativize_optional(&self, file: Option<&Path>) -> Result<String, EngineError> {
        match file {
            Some(file) => self.relativize_from_working_directory(file),
            None => Ok(String::new()),
        }
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for TemplateEngine {
    type Configuration = TemplateConfiguration;

    fn core(&self) -> &EngineCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut EngineCore {
        &mut self.core
    }

    fn configuration(&self) -> Option<&TemplateConfiguration> {
        self.configuration.as_ref()
    }

    fn set_configuration(&mut self, configuration: TemplateConfiguration) {
        self.configuration = Some(configuration);
    }

    fn read_configuration_from<R: Read>(&self, reader: R) -> Result<TemplateConfiguration, EngineError> {
        let working_directory = self.core.require_working_directory()?;
        let document: TemplateDocument = serde_json::from_reader(reader)
            .map_err(|e| EngineError::MalformedConfiguration(e.to_string()))?;
        let section = document.template;

        let mut configuration = TemplateConfiguration {
            name: section.name,
            version: section.version,
            file: resolve(working_directory, &section.file),
            js_object: section.js_object,
            resources_directory: resolve(working_directory, &section.resources_directory),
            default_variables: decode_variables(section.default_variables)?,
            ..Default::default()
        };
        debug!(name = %configuration.name, version = ?configuration.version, "[Template configuration] read");

        let Some(slides) = section.slides else {
            debug!("No slide's configuration found");
            return Ok(configuration);
        };

        let slides_configuration = slides.configuration;
        configuration.slides_container = slides_configuration.slides_container;
        configuration.slide_id_prefix = slides_configuration.slide_id_prefix;
        configuration.slides_template_directory =
            resolve(working_directory, &slides_configuration.template_directory);
        configuration.slides_presentation_directory =
            resolve(working_directory, &slides_configuration.presentation_directory);
        configuration.slides_thumbnail_directory =
            resolve(working_directory, &slides_configuration.thumbnail_directory);
        debug!(
            container = %configuration.slides_container,
            prefix = %configuration.slide_id_prefix,
            "[Slide's configuration] read"
        );

        let slides_base = configuration
            .slides_template_directory
            .clone()
            .unwrap_or_else(|| working_directory.to_path_buf());

        let mut seen = HashSet::new();
        for definition in slides.slides_definition {
            if !seen.insert(definition.id) {
                return Err(EngineError::MalformedConfiguration(format!(
                    "Duplicate slide template id {}",
                    definition.id
                )));
            }
            let mut element_ids = HashSet::new();
            if let Some(duplicate) = definition.elements.iter().find(|e| !element_ids.insert(e.id)) {
                return Err(EngineError::MalformedConfiguration(format!(
                    "Duplicate element id {} in slide template {}",
                    duplicate.id, definition.id
                )));
            }

            debug!(id = definition.id, name = %definition.name, file = %definition.file, "[Slide definition] read");
            configuration.slide_templates.push(SlideTemplate {
                id: definition.id,
                name: definition.name,
                file: resolve(&slides_base, &definition.file),
                dynamic_attributes: definition.dynamic_attributes,
                elements: definition.elements,
            });
        }

        Ok(configuration)
    }

    fn write_configuration_to<W: Write>(&self, writer: W) -> Result<(), EngineError> {
        let configuration = self
            .configuration
            .as_ref()
            .ok_or(EngineError::Precondition("The template engine has no configuration"))?;

        let slides_base = configuration
            .slides_template_directory
            .clone()
            .or_else(|| self.working_directory().map(Path::to_path_buf))
            .ok_or(EngineError::Precondition("The working directory is not set"))?;

        let slides_definition = configuration
            .slide_templates
            .iter()
            .map(|template| SlideDefinitionEntry {
                id: template.id,
                name: template.name.clone(),
                file: template
                    .file
                    .as_deref()
                    .map(|f| relative_path(&slides_base, f))
                    .unwrap_or_default(),
                dynamic_attributes: template.dynamic_attributes.clone(),
                elements: template.elements.clone(),
            })
            .collect();

        let document = TemplateDocument {
            template: TemplateSection {
                name: configuration.name.clone(),
                version: configuration.version.clone(),
                file: self.relativize_optional(configuration.file.as_deref())?,
                js_object: configuration.js_object.clone(),
                resources_directory: self.relativize_optional(configuration.resources_directory.as_deref())?,
                default_variables: encode_variables(&configuration.default_variables),
                slides: Some(SlidesSection {
                    configuration: SlidesConfigurationEntry {
                        slides_container: configuration.slides_container.clone(),
                        slide_id_prefix: configuration.slide_id_prefix.clone(),
                        template_directory: self
                            .relativize_optional(configuration.slides_template_directory.as_deref())?,
                        presentation_directory: self
                            .relativize_optional(configuration.slides_presentation_directory.as_deref())?,
                        thumbnail_directory: self
                            .relativize_optional(configuration.slides_thumbnail_directory.as_deref())?,
                    },
                    slides_definition,
                }),
            },
        };

        serde_json::to_writer_pretty(writer, &document)?;
        Ok(())
    }

    fn load_archive(&mut self, file: &Path) -> Result<(), EngineError> {
        self.core.unpack(file)?;
        let configuration = self.read_configuration()?;
        self.configuration = Some(configuration);
        Ok(())
    }

    fn save_archive(&self, file: &Path) -> Result<(), EngineError> {
        self.core.check_extension(file)?;
        let _guard = self.core.lock_save();

        self.write_configuration()?;
        let working_directory = self.core.require_working_directory()?;
        crate::archive::zip_directory(working_directory, file)?;

        debug!(archive = %file.display(), "Template saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const CONFIG: &str = r#"{
      "template": {
        "name": "Blue",
        "file": "template.html",
        "js-object": "sfx",
        "resources-directory": "resources",
        "default-variables": [ { "name": "author", "value": "QWRh" } ],
        "slides": {
          "configuration": {
            "slides-container": "slides",
            "slide-id-prefix": "slide-",
            "template-directory": "slides/template",
            "presentation-directory": "slides/presentation",
            "thumbnail-directory": "slides/thumbnails"
          },
          "slides-definition": [
            { "id": 1, "name": "Title", "file": "title.html",
              "elements": [ { "id": 1, "html-id": "${slideIdPrefix}${slideNumber}-title", "default-content": "Untitled" } ] },
            { "id": 2, "name": "Blank", "file": "blank.html" }
          ]
        }
      }
    }"#;

    fn engine_in(dir: &Path) -> TemplateEngine {
        let mut engine = TemplateEngine::new();
        engine.set_working_directory(Some(dir.to_path_buf()));
        engine
    }

    #[test]
    fn test_read_configuration() {
        let dir = tempdir().unwrap();
        let engine = engine_in(dir.path());
        let configuration = engine.read_configuration_from(CONFIG.as_bytes()).unwrap();

        assert_eq!(configuration.name, "Blue");
        assert_eq!(configuration.version, None);
        assert_eq!(configuration.file, Some(dir.path().join("template.html")));
        assert_eq!(configuration.default_variables, vec![Variable::new("author", "Ada")]);
        assert_eq!(configuration.slide_templates.len(), 2);

        let title = configuration.slide_template(1).unwrap();
        assert_eq!(title.file, Some(dir.path().join("slides/template/title.html")));
        assert_eq!(title.elements[0].default_content, "Untitled");

        let blank = configuration.slide_template(2).unwrap();
        assert!(blank.elements.is_empty());
        assert!(blank.dynamic_attributes.is_empty());
    }

    #[test]
    fn test_missing_name_is_malformed() {
        let dir = tempdir().unwrap();
        let engine = engine_in(dir.path());
        let result = engine.read_configuration_from(r#"{"template": {"file": "t.html"}}"#.as_bytes());
        assert!(matches!(result, Err(EngineError::MalformedConfiguration(_))));
    }

    #[test]
    fn test_duplicate_slide_template_ids_rejected() {
        let dir = tempdir().unwrap();
        let engine = engine_in(dir.path());
        let json = r#"{"template": {"name": "n", "file": "t.html", "slides": {
            "slides-definition": [ {"id": 1, "file": "a.html"}, {"id": 1, "file": "b.html"} ] } } }"#;
        let result = engine.read_configuration_from(json.as_bytes());
        assert!(matches!(result, Err(EngineError::MalformedConfiguration(_))));
    }

    #[test]
    fn test_read_requires_working_directory() {
        let engine = TemplateEngine::new();
        let result = engine.read_configuration_from(CONFIG.as_bytes());
        assert!(matches!(result, Err(EngineError::Precondition(_))));
    }

    #[test]
    fn test_write_uses_relative_paths() {
        let dir = tempdir().unwrap();
        let mut engine = engine_in(dir.path());
        let configuration = engine.read_configuration_from(CONFIG.as_bytes()).unwrap();
        engine.set_configuration(configuration);

        let mut out = vec![];
        engine.write_configuration_to(&mut out).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&out).unwrap();

        assert_eq!(json["template"]["file"], "template.html");
        assert_eq!(json["template"]["default-variables"][0]["value"], "QWRh");
        assert_eq!(json["template"]["slides"]["configuration"]["template-directory"], "slides/template");
        assert_eq!(json["template"]["slides"]["slides-definition"][0]["file"], "title.html");
    }
}
