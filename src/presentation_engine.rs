//! Presentation Engine - `.sfx` Archives
//!
//! A presentation archive is a template archive plus `presentation-config.json`
//! and the generated `presentation.html`. The engine keeps the slide list and
//! the presentation document in step: every slide mutation is applied to both
//! and the presentation file is rewritten afterwards.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Mutex;

use image::ImageFormat;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::engine::{unique_timestamp, Engine, EngineCore, EngineError};
use crate::hashing::configuration_fingerprint;
use crate::html::{first_element_id, HtmlDocument};
use crate::presentation::{
    PresentationConfiguration, Resource, ResourceType, Slide, SlideElement,
    DEFAULT_PRESENTATION_FILENAME, HTML_CONTENT_CODE,
};
use crate::settings::Settings;
use crate::template::{
    decode_variables, encode_variables, SlideTemplate, SlideTemplateId, TemplateConfiguration,
    TemplateEngine, VariableEntry,
};
use crate::variables::{decode_base64, encode_base64, render, Variable, VariableSet};

pub const PRESENTATION_ARCHIVE_EXTENSION: &str = "sfx";
pub const PRESENTATION_CONFIGURATION_FILENAME: &str = "presentation-config.json";

const SLIDE_NUMBER_TOKEN: &str = "slideNumber";
const SLIDE_ID_PREFIX_TOKEN: &str = "slideIdPrefix";
const SFX_CALLBACK_TOKEN: &str = "sfxCallback";
const SFX_JAVASCRIPT_RESOURCES_TOKEN: &str = "sfxJavascriptResources";

/// Value of the `sfxCallback` token in slide templates.
pub const SFX_CALLBACK_CALL: &str = "sendInformationToSlideshowFX(this);";

// --- Document structs (presentation-config.json) ---

#[derive(Debug, Serialize, Deserialize)]
struct PresentationDocument {
    presentation: PresentationSection,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct PresentationSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<i64>,
    #[serde(default)]
    custom_resources: Vec<ResourceEntry>,
    #[serde(default)]
    variables: Vec<VariableEntry>,
    #[serde(default)]
    slides: Vec<SlideEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ResourceEntry {
    #[serde(rename = "type")]
    resource_type: ResourceType,
    content: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct SlideEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    template_id: Option<SlideTemplateId>,
    id: String,
    number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    speaker_notes: Option<String>,
    #[serde(default)]
    elements: Vec<ElementEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ElementEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    template_id: Option<i32>,
    element_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    original_content_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    original_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    html_content: Option<String>,
}

fn decode_optional(value: Option<String>) -> Result<Option<String>, EngineError> {
    value.as_deref().map(decode_base64).transpose()
}

/// Engine for `.sfx` presentation archives.
#[derive(Debug)]
pub struct PresentationEngine {
    core: EngineCore,
    template_engine: TemplateEngine,
    configuration: Option<PresentationConfiguration>,
    javascript_resources: String,
    saved_fingerprint: Mutex<Option<String>>,
}

impl PresentationEngine {
    pub fn new() -> Self {
        Self {
            core: EngineCore::new(PRESENTATION_ARCHIVE_EXTENSION, PRESENTATION_CONFIGURATION_FILENAME),
            template_engine: TemplateEngine::new(),
            configuration: None,
            javascript_resources: String::new(),
            saved_fingerprint: Mutex::new(None),
        }
    }

    pub fn with_settings(settings: &Settings) -> Self {
        let mut engine = Self::new();
        engine.core.set_temp_root(settings.temp_root());
        engine.template_engine.core_mut().set_temp_root(settings.temp_root());
        engine
    }

    pub fn template_engine(&self) -> &TemplateEngine {
        &self.template_engine
    }

    pub fn template_configuration(&self) -> Result<&TemplateConfiguration, EngineError> {
        self.template_engine
            .configuration()
            .ok_or(EngineError::Precondition("No template is loaded"))
    }

    pub fn configuration_mut(&mut self) -> Option<&mut PresentationConfiguration> {
        self.configuration.as_mut()
    }

    /// Scripts injected through the `sfxJavascriptResources` token of the
    /// template file. Applies to documents built afterwards.
    pub fn set_javascript_resources(&mut self, resources: impl Into<String>) {
        self.javascript_resources = resources.into();
    }

    fn require_configuration(&self) -> Result<&PresentationConfiguration, EngineError> {
        self.configuration
            .as_ref()
            .ok_or(EngineError::Precondition("No presentation is open"))
    }

    fn require_configuration_mut(&mut self) -> Result<&mut PresentationConfiguration, EngineError> {
        self.configuration
            .as_mut()
            .ok_or(EngineError::Precondition("No presentation is open"))
    }

    fn slide_template(&self, id: SlideTemplateId) -> Result<SlideTemplate, EngineError> {
        self.template_configuration()?
            .slide_template(id)
            .cloned()
            .ok_or_else(|| EngineError::Template(format!("Unknown slide template {}", id)))
    }

    /// Starts a new, unsaved presentation from a template archive. The
    /// presentation shares the template's working directory.
    pub fn create_from_template(&mut self, template_archive: &Path) -> Result<(), EngineError> {
        let mut template_engine = TemplateEngine::new();
        template_engine.core_mut().set_temp_root(self.core.temp_root().to_path_buf());
        template_engine.load_archive(template_archive)?;

        let working_directory = template_engine.core().require_working_directory()?.to_path_buf();
        self.template_engine = template_engine;
        self.core.set_archive(None);
        self.core.set_working_directory(Some(working_directory.clone()));

        let mut configuration = PresentationConfiguration::new(chrono::Utc::now().timestamp_millis());
        configuration.presentation_file = Some(working_directory.join(DEFAULT_PRESENTATION_FILENAME));
        configuration.variables = self.template_configuration()?.default_variables.clone();
        configuration.document = self.build_document()?;
        self.configuration = Some(configuration);

        self.save_presentation_file()?;
        *self.saved_fingerprint.lock().unwrap_or_else(|p| p.into_inner()) = None;

        info!(template = %template_archive.display(), "Presentation created from template");
        Ok(())
    }

    /// Creates a slide from template `template_id` and places it right after
    /// slide `after_slide_number`, or at the end when absent or unknown.
    ///
    /// `dynamic_values` maps a dynamic attribute name to its value. Missing or
    /// blank values drop the attribute.
    pub fn add_slide(
        &mut self,
        template_id: SlideTemplateId,
        after_slide_number: Option<&str>,
        dynamic_values: &HashMap<String, String>,
    ) -> Result<Slide, EngineError> {
        let template = self.slide_template(template_id)?;
        let container = self.template_configuration()?.slides_container.clone();
        let variables = self.require_configuration()?.variables.clone();
        let (slide, fragment) = self.create_slide(&template, &variables, dynamic_values)?;

        let configuration = self.require_configuration_mut()?;
        configuration.check_new_slide(&slide)?;
        let anchor = after_slide_number
            .and_then(|number| configuration.slide_index(number))
            .map(|index| (index, configuration.slides()[index].id.clone()));

        match anchor {
            Some((index, anchor_id)) => {
                if !configuration.document.insert_after(&anchor_id, &fragment) {
                    return Err(EngineError::Document(format!(
                        "No slide with id {} in the presentation document",
                        anchor_id
                    )));
                }
                configuration.insert_slide(index + 1, slide.clone())?;
            }
            None => {
                if !configuration.document.append_child(&container, &fragment) {
                    return Err(EngineError::Document(format!(
                        "No slides container {} in the presentation document",
                        container
                    )));
                }
                configuration.add_slide(slide.clone())?;
            }
        }
        debug!(slide = %slide.slide_number, id = %slide.id, template = template_id, "Slide added");

        self.save_presentation_file()?;
        Ok(slide)
    }

    pub fn delete_slide(&mut self, slide_number: &str) -> Result<Option<Slide>, EngineError> {
        let configuration = self.require_configuration_mut()?;
        let removed = configuration.remove_slide(slide_number);
        if let Some(slide) = &removed {
            configuration.document.remove(&slide.id);
            debug!(slide = %slide_number, "Slide deleted");
        }
        self.save_presentation_file()?;
        Ok(removed)
    }

    /// Inserts a copy of slide `slide_number` right after it. Elements are
    /// matched by their element template.
    pub fn duplicate_slide(&mut self, slide_number: &str) -> Result<Slide, EngineError> {
        let source = self
            .require_configuration()?
            .slide_by_number(slide_number)
            .cloned()
            .ok_or_else(|| EngineError::Document(format!("No slide with number {}", slide_number)))?;
        let template_id = source
            .template_id
            .ok_or_else(|| EngineError::Template(format!("Slide {} has no template", slide_number)))?;
        let template = self.slide_template(template_id)?;
        let variables = self.require_configuration()?.variables.clone();
        let (mut slide, fragment) = self.create_slide(&template, &variables, &HashMap::new())?;

        for copy in slide.elements_mut() {
            let original = source
                .elements()
                .find(|original| original.template_id.is_some() && original.template_id == copy.template_id);
            if let Some(original) = original {
                copy.original_content_code = original.original_content_code.clone();
                copy.original_content = original.original_content.clone();
                copy.html_content = original.html_content.clone();
            }
        }

        let configuration = self.require_configuration_mut()?;
        configuration.check_new_slide(&slide)?;
        if !configuration.document.insert_after(&source.id, &fragment) {
            return Err(EngineError::Document(format!(
                "No slide with id {} in the presentation document",
                source.id
            )));
        }
        let index = configuration
            .slide_index(slide_number)
            .map_or(configuration.slides().len(), |index| index + 1);
        configuration.insert_slide(index, slide.clone())?;
        configuration.update_slide_in_document(&slide)?;
        debug!(source = %slide_number, slide = %slide.slide_number, "Slide duplicated");

        self.save_presentation_file()?;
        Ok(slide)
    }

    /// Moves slide `slide_number` before slide `before_slide_number`, or to the
    /// end. Returns `false` when nothing was moved.
    pub fn move_slide(
        &mut self,
        slide_number: &str,
        before_slide_number: Option<&str>,
    ) -> Result<bool, EngineError> {
        if before_slide_number == Some(slide_number) {
            return Ok(false);
        }
        let container = self.template_configuration()?.slides_container.clone();
        let configuration = self.require_configuration_mut()?;

        let Some(slide_id) = configuration.slide_by_number(slide_number).map(|s| s.id.clone()) else {
            return Ok(false);
        };
        let before_id = match before_slide_number {
            Some(before) => match configuration.slide_by_number(before) {
                Some(slide) => Some(slide.id.clone()),
                None => return Ok(false),
            },
            None => None,
        };

        let html = configuration.document.remove(&slide_id).ok_or_else(|| {
            EngineError::Document(format!("No slide with id {} in the presentation document", slide_id))
        })?;
        configuration.move_slide(slide_number, before_slide_number);

        let placed = match &before_id {
            Some(id) => configuration.document.insert_before(id, &html),
            None => configuration.document.append_child(&container, &html),
        };
        if !placed {
            return Err(EngineError::Document(format!(
                "Can not place slide {} back in the presentation document",
                slide_number
            )));
        }
        debug!(slide = %slide_number, before = ?before_slide_number, "Slide moved");

        self.save_presentation_file()?;
        Ok(true)
    }

    pub fn update_element(
        &mut self,
        slide_number: &str,
        element_id: &str,
        code: &str,
        original_content: &str,
        html_content: &str,
    ) -> Result<(), EngineError> {
        self.require_configuration_mut()?
            .update_element(slide_number, element_id, code, original_content, html_content)?;
        self.save_presentation_file()
    }

    /// Defines or redefines a variable and refreshes every slide using it.
    pub fn set_variable(&mut self, name: &str, value: &str) -> Result<(), EngineError> {
        let configuration = self.require_configuration_mut()?;
        configuration.set_variable(name, value);
        let slides = configuration.slides().to_vec();
        for slide in &slides {
            configuration.update_slide_in_document(slide)?;
        }
        self.save_presentation_file()
    }

    /// Adds a resource and links it from the document head. Blank or already
    /// present resources are ignored.
    pub fn add_custom_resource(&mut self, resource: Resource) -> Result<bool, EngineError> {
        let location = self.resources_location()?;
        let configuration = self.require_configuration_mut()?;
        let html = resource.to_html(&location);
        if !configuration.add_custom_resource(resource) {
            return Ok(false);
        }
        if !configuration.document.head_contains(&html) {
            configuration.document.append_to_head(&html);
        }
        self.save_presentation_file()?;
        Ok(true)
    }

    /// Writes the document into the presentation file.
    pub fn save_presentation_file(&self) -> Result<(), EngineError> {
        let configuration = self.require_configuration()?;
        let file = configuration
            .presentation_file
            .as_deref()
            .ok_or(EngineError::Precondition("The presentation file is not set"))?;
        fs::write(file, configuration.document.html())?;
        debug!(file = %file.display(), "Presentation file saved");
        Ok(())
    }

    /// Saves into `file` and makes it the archive of this presentation.
    pub fn save_as(&mut self, file: &Path) -> Result<(), EngineError> {
        self.save_archive(file)?;
        self.core.set_archive(Some(file.to_path_buf()));
        Ok(())
    }

    pub fn is_presentation_already_saved(&self) -> bool {
        self.core.archive().is_some()
    }

    /// Whether the configuration differs from what was last loaded or saved.
    /// Thumbnails and the document are not taken into account.
    pub fn is_modified_since_latest_save(&self) -> bool {
        let current = match self.current_fingerprint() {
            Ok(current) => current,
            Err(e) => {
                warn!(error = %e, "Can not fingerprint the presentation");
                return true;
            }
        };
        let saved = self.saved_fingerprint.lock().unwrap_or_else(|p| p.into_inner());
        current.is_some() && current != *saved
    }

    fn current_fingerprint(&self) -> Result<Option<String>, EngineError> {
        if self.configuration.is_none() {
            return Ok(None);
        }
        let mut document = vec![];
        self.write_configuration_to(&mut document)?;
        Ok(Some(configuration_fingerprint(&document)?))
    }

    fn record_saved_state(&self) -> Result<(), EngineError> {
        let fingerprint = self.current_fingerprint()?;
        *self.saved_fingerprint.lock().unwrap_or_else(|p| p.into_inner()) = fingerprint;
        Ok(())
    }

    fn build_document(&self) -> Result<HtmlDocument, EngineError> {
        let file = self
            .template_configuration()?
            .file
            .as_deref()
            .ok_or_else(|| EngineError::Template("The template has no presentation file".to_string()))?;
        let source = fs::read_to_string(file)?;
        let html = render(&source, |name| {
            (name == SFX_JAVASCRIPT_RESOURCES_TOKEN).then(|| Cow::Borrowed(self.javascript_resources.as_str()))
        });
        Ok(HtmlDocument::parse(html))
    }

    /// Resources directory relative to the working directory, `""` if none.
    fn resources_location(&self) -> Result<String, EngineError> {
        match self
            .template_engine
            .configuration()
            .and_then(|c| c.resources_directory.as_deref())
        {
            Some(directory) => self.relativize_from_working_directory(directory),
            None => Ok(String::new()),
        }
    }

    fn render_slide_file(
        &self,
        template: &SlideTemplate,
        slide_number: &str,
        variables: &[Variable],
        attributes: &HashMap<String, String>,
    ) -> Result<String, EngineError> {
        let file = template
            .file
            .as_deref()
            .ok_or_else(|| EngineError::Template(format!("Slide template {} has no file", template.id)))?;
        let source = fs::read_to_string(file)?;
        let prefix = self.template_configuration()?.slide_id_prefix.as_str();

        Ok(render(&source, |name| match name {
            SLIDE_NUMBER_TOKEN => Some(Cow::Borrowed(slide_number)),
            SLIDE_ID_PREFIX_TOKEN => Some(Cow::Borrowed(prefix)),
            SFX_CALLBACK_TOKEN => Some(Cow::Borrowed(SFX_CALLBACK_CALL)),
            _ => attributes
                .get(name)
                .map(|value| Cow::Borrowed(value.as_str()))
                .or_else(|| {
                    variables
                        .iter()
                        .find(|v| v.name == name)
                        .map(|v| Cow::Borrowed(v.value.as_str()))
                }),
        }))
    }

    /// Builds a new slide and its markup. The slide id is the id of the root
    /// element of the rendered fragment.
    fn create_slide(
        &self,
        template: &SlideTemplate,
        variables: &[Variable],
        dynamic_values: &HashMap<String, String>,
    ) -> Result<(Slide, String), EngineError> {
        let prefix = self.template_configuration()?.slide_id_prefix.clone();
        let slide_number = unique_timestamp().to_string();
        let mut slide = Slide::new(String::new(), slide_number.clone()).with_template(template.id);

        for element in &template.elements {
            let html_id = render(&element.html_id, |name| match name {
                SLIDE_ID_PREFIX_TOKEN => Some(Cow::Borrowed(prefix.as_str())),
                SLIDE_NUMBER_TOKEN => Some(Cow::Borrowed(slide_number.as_str())),
                _ => None,
            });
            slide
                .update_element(&html_id, HTML_CONTENT_CODE, &element.default_content, &element.default_content)
                .template_id = Some(element.id);
        }

        let attributes: HashMap<String, String> = template
            .dynamic_attributes
            .iter()
            .map(|attribute| {
                let value = dynamic_values
                    .get(&attribute.attribute)
                    .map(|v| v.trim())
                    .filter(|v| !v.is_empty())
                    .map(|v| format!(r#"{}="{}""#, attribute.attribute, v))
                    .unwrap_or_default();
                (attribute.template_expression.clone(), value)
            })
            .collect();

        let fragment = self.render_slide_file(template, &slide_number, variables, &attributes)?;
        let mut fragment = HtmlDocument::parse(fragment);
        for element in slide.elements() {
            fragment.set_inner_html(&element.id, &element.cleared_html_content(variables));
        }

        slide.id = first_element_id(fragment.html()).ok_or_else(|| {
            EngineError::Template(format!("Slide template {} has no root element id", template.id))
        })?;
        Ok((slide, fragment.html().to_string()))
    }

    fn append_resource_to_head(
        configuration: &mut PresentationConfiguration,
        location: &str,
        resource: &Resource,
    ) {
        let html = resource.to_html(location);
        if !configuration.document.head_contains(&html) {
            configuration.document.append_to_head(&html);
        }
    }

    /// Renders every slide into the slides container. Dynamic attributes are
    /// not stored, so they render empty.
    fn render_slides(&self, configuration: &mut PresentationConfiguration) -> Result<(), EngineError> {
        let template_configuration = self.template_configuration()?;
        let slides = configuration.slides().to_vec();

        for slide in &slides {
            let Some(template) = slide
                .template_id
                .and_then(|id| template_configuration.slide_template(id))
            else {
                warn!(slide = %slide.slide_number, "Slide without template is not rendered");
                continue;
            };
            let attributes: HashMap<String, String> = template
                .dynamic_attributes
                .iter()
                .map(|a| (a.template_expression.clone(), String::new()))
                .collect();

            let fragment =
                self.render_slide_file(template, &slide.slide_number, &configuration.variables, &attributes)?;
            if !configuration
                .document
                .append_child(&template_configuration.slides_container, &fragment)
            {
                return Err(EngineError::Document(format!(
                    "No slides container {} in the presentation document",
                    template_configuration.slides_container
                )));
            }
            configuration.update_slide_in_document(slide)?;
        }
        Ok(())
    }

    /// Thumbnails are optional: unreadable files are logged and skipped.
    fn load_thumbnails(&self, configuration: &mut PresentationConfiguration) {
        let Some(directory) = self
            .template_engine
            .configuration()
            .and_then(|c| c.slides_thumbnail_directory.as_deref())
        else {
            return;
        };

        let numbers: Vec<String> = configuration.slides().iter().map(|s| s.slide_number.clone()).collect();
        for number in numbers {
            let file = directory.join(format!("{}.png", number));
            if !file.is_file() {
                continue;
            }
            match image::open(&file) {
                Ok(thumbnail) => {
                    configuration.update_slide_thumbnail(&number, thumbnail.to_rgba8());
                }
                Err(e) => info!(file = %file.display(), error = %e, "Error setting the thumbnail"),
            }
        }
    }

    /// Replaces the thumbnail directory content with the current thumbnails.
    fn write_thumbnails(&self, configuration: &PresentationConfiguration) -> Result<(), EngineError> {
        let Some(directory) = self
            .template_engine
            .configuration()
            .and_then(|c| c.slides_thumbnail_directory.as_deref())
        else {
            debug!("No thumbnail directory, thumbnails are not saved");
            return Ok(());
        };

        if directory.is_dir() {
            for entry in fs::read_dir(directory)? {
                let path = entry?.path();
                if path.is_file() {
                    fs::remove_file(&path)?;
                }
            }
        } else {
            fs::create_dir_all(directory)?;
        }

        for slide in configuration.slides() {
            let Some(thumbnail) = &slide.thumbnail else {
                continue;
            };
            let file = directory.join(format!("{}.png", slide.slide_number));
            debug!(file = %file.display(), "Creating thumbnail file");
            thumbnail.save_with_format(&file, ImageFormat::Png)?;
        }
        Ok(())
    }
}

impl Default for PresentationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for PresentationEngine {
    type Configuration = PresentationConfiguration;

    fn core(&self) -> &EngineCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut EngineCore {
        &mut self.core
    }

    fn configuration(&self) -> Option<&PresentationConfiguration> {
        self.configuration.as_ref()
    }

    fn set_configuration(&mut self, configuration: PresentationConfiguration) {
        self.configuration = Some(configuration);
    }

    /// Slide and element template references are checked against the loaded
    /// template, when there is one.
    fn read_configuration_from<R: Read>(&self, reader: R) -> Result<PresentationConfiguration, EngineError> {
        let working_directory = self.core.require_working_directory()?;
        let document: PresentationDocument = serde_json::from_reader(reader)
            .map_err(|e| EngineError::MalformedConfiguration(e.to_string()))?;
        let section = document.presentation;

        let id = section.id.unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
        let mut configuration = PresentationConfiguration::new(id);
        configuration.presentation_file = Some(working_directory.join(DEFAULT_PRESENTATION_FILENAME));

        for entry in section.custom_resources {
            let content = decode_base64(&entry.content)?;
            configuration.custom_resources.push(Resource::new(entry.resource_type, content));
        }
        configuration.variables = decode_variables(section.variables)?;
        debug!(id, variables = configuration.variables.len(), "[Presentation configuration] read");

        let templates = self.template_engine.configuration();
        for entry in section.slides {
            let slide_template = match (templates, entry.template_id) {
                (Some(templates), Some(template_id)) => {
                    Some(templates.slide_template(template_id).ok_or_else(|| {
                        EngineError::MalformedConfiguration(format!(
                            "Slide {} references the unknown slide template {}",
                            entry.number, template_id
                        ))
                    })?)
                }
                _ => None,
            };

            let mut slide = Slide::new(entry.id, entry.number);
            slide.template_id = entry.template_id;
            if let Some(notes) = entry.speaker_notes {
                slide.set_speaker_notes(Some(&decode_base64(&notes)?));
            }

            for element in entry.elements {
                if let (Some(template), Some(element_template_id)) = (slide_template, element.template_id) {
                    if template.element(element_template_id).is_none() {
                        return Err(EngineError::MalformedConfiguration(format!(
                            "Element {} references the unknown element template {}",
                            element.element_id, element_template_id
                        )));
                    }
                }
                slide.insert_element(SlideElement {
                    id: element.element_id,
                    template_id: element.template_id,
                    original_content_code: element.original_content_code,
                    original_content: decode_optional(element.original_content)?,
                    html_content: decode_optional(element.html_content)?,
                });
            }

            debug!(
                id = %slide.id,
                number = %slide.slide_number,
                template = ?slide.template_id,
                elements = slide.element_count(),
                "[Slide] read"
            );
            configuration
                .add_slide(slide)
                .map_err(|e| EngineError::MalformedConfiguration(e.to_string()))?;
        }

        Ok(configuration)
    }

    fn write_configuration_to<W: Write>(&self, writer: W) -> Result<(), EngineError> {
        let configuration = self.require_configuration()?;

        let slides = configuration
            .slides()
            .iter()
            .map(|slide| SlideEntry {
                template_id: slide.template_id,
                id: slide.id.clone(),
                number: slide.slide_number.clone(),
                speaker_notes: slide.speaker_notes().map(encode_base64),
                elements: slide
                    .elements()
                    .map(|element| ElementEntry {
                        template_id: element.template_id,
                        element_id: element.id.clone(),
                        original_content_code: element.original_content_code.clone(),
                        original_content: element.original_content.as_deref().map(encode_base64),
                        html_content: element.html_content.as_deref().map(encode_base64),
                    })
                    .collect(),
            })
            .collect();

        let document = PresentationDocument {
            presentation: PresentationSection {
                id: Some(configuration.id),
                custom_resources: configuration
                    .custom_resources
                    .iter()
                    .map(|resource| ResourceEntry {
                        resource_type: resource.resource_type,
                        content: encode_base64(&resource.content),
                    })
                    .collect(),
                variables: encode_variables(&configuration.variables),
                slides,
            },
        };

        serde_json::to_writer_pretty(writer, &document)?;
        Ok(())
    }

    fn load_archive(&mut self, file: &Path) -> Result<(), EngineError> {
        let working_directory = self.core.unpack(file)?;

        let mut template_engine = TemplateEngine::new();
        template_engine.core_mut().set_temp_root(self.core.temp_root().to_path_buf());
        template_engine.set_working_directory(Some(working_directory));
        let template_configuration = template_engine.read_configuration()?;
        template_engine.set_configuration(template_configuration);
        self.template_engine = template_engine;

        let mut configuration = self.read_configuration()?;
        configuration
            .variables
            .merge_missing(&self.template_configuration()?.default_variables);
        configuration.document = self.build_document()?;

        let location = self.resources_location()?;
        for resource in &configuration.custom_resources.clone() {
            Self::append_resource_to_head(&mut configuration, &location, resource);
        }
        self.render_slides(&mut configuration)?;
        self.load_thumbnails(&mut configuration);

        self.configuration = Some(configuration);
        self.save_presentation_file()?;
        self.record_saved_state()?;

        info!(archive = %file.display(), "Presentation loaded");
        Ok(())
    }

    fn save_archive(&self, file: &Path) -> Result<(), EngineError> {
        self.core.check_extension(file)?;
        let _guard = self.core.lock_save();

        self.write_configuration()?;
        self.write_thumbnails(self.require_configuration()?)?;
        let working_directory = self.core.require_working_directory()?;
        crate::archive::zip_directory(working_directory, file)?;
        self.record_saved_state()?;

        info!(archive = %file.display(), "Presentation saved");
        Ok(())
    }
}
