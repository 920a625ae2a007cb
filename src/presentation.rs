//! Presentation Model - Ordered Slides Bound to an HTML Document
//!
//! The slide list is the only source of ordering. `slide_number` is an opaque
//! key: it is compared for equality, never interpreted.

use std::collections::BTreeMap;
use std::path::PathBuf;

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::engine::EngineError;
use crate::html::HtmlDocument;
use crate::template::SlideTemplateId;
use crate::variables::{substitute, Variable, VariableSet};

pub const DEFAULT_PRESENTATION_FILENAME: &str = "presentation.html";

/// Content syntax code of elements populated directly with HTML.
pub const HTML_CONTENT_CODE: &str = "HTML";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceType {
    JavascriptFile,
    Script,
    CssFile,
    Css,
}

/// Custom script or stylesheet attached to a presentation. Two resources with
/// the same content are the same resource.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub resource_type: ResourceType,
    pub content: String,
}

impl PartialEq for Resource {
    fn eq(&self, other: &Self) -> bool {
        self.content == other.content
    }
}

impl Resource {
    pub fn new(resource_type: ResourceType, content: impl Into<String>) -> Self {
        Self {
            resource_type,
            content: content.into(),
        }
    }

    /// Markup for the document head. File resources are looked up under
    /// `location`.
    pub fn to_html(&self, location: &str) -> String {
        let path = if location.is_empty() {
            self.content.clone()
        } else {
            format!("{}/{}", location, self.content)
        };
        match self.resource_type {
            ResourceType::JavascriptFile => {
                format!(r#"<script type="text/javascript" src="{}"></script>"#, path)
            }
            ResourceType::Script => format!(r#"<script type="text/javascript">{}</script>"#, self.content),
            ResourceType::CssFile => format!(r#"<link rel="stylesheet" href="{}">"#, path),
            ResourceType::Css => format!("<style>{}</style>", self.content),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlideElement {
    pub id: String,
    pub template_id: Option<i32>,
    pub original_content: Option<String>,
    pub original_content_code: Option<String>,
    pub html_content: Option<String>,
}

impl SlideElement {
    /// `html_content` with every known variable expanded. The stored content is
    /// left untouched.
    pub fn cleared_html_content(&self, variables: &[Variable]) -> String {
        substitute(self.html_content.as_deref().unwrap_or_default(), variables)
    }

    pub fn is_authored(&self) -> bool {
        self.html_content.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Slide {
    pub id: String,
    pub slide_number: String,
    pub template_id: Option<SlideTemplateId>,
    pub thumbnail: Option<RgbaImage>,
    speaker_notes: Option<String>,
    elements: BTreeMap<String, SlideElement>,
}

impl Slide {
    pub fn new(id: impl Into<String>, slide_number: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            slide_number: slide_number.into(),
            ..Default::default()
        }
    }

    pub fn with_template(mut self, template_id: SlideTemplateId) -> Self {
        self.template_id = Some(template_id);
        self
    }

    pub fn speaker_notes(&self) -> Option<&str> {
        self.speaker_notes.as_deref()
    }

    /// Notes are stored trimmed; blank notes clear them.
    pub fn set_speaker_notes(&mut self, notes: Option<&str>) {
        self.speaker_notes = notes
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string);
    }

    pub fn has_speaker_notes(&self) -> bool {
        self.speaker_notes.is_some()
    }

    pub fn elements(&self) -> impl Iterator<Item = &SlideElement> {
        self.elements.values()
    }

    pub fn elements_mut(&mut self) -> impl Iterator<Item = &mut SlideElement> {
        self.elements.values_mut()
    }

    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    pub fn element(&self, id: &str) -> Option<&SlideElement> {
        self.elements.get(id)
    }

    pub fn element_mut(&mut self, id: &str) -> Option<&mut SlideElement> {
        self.elements.get_mut(id)
    }

    pub fn insert_element(&mut self, element: SlideElement) {
        self.elements.insert(element.id.clone(), element);
    }

    /// Overwrites the content of element `element_id`, creating it when absent.
    pub fn update_element(
        &mut self,
        element_id: &str,
        code: &str,
        original_content: &str,
        html_content: &str,
    ) -> &mut SlideElement {
        let element = self
            .elements
            .entry(element_id.to_string())
            .or_insert_with(|| SlideElement {
                id: element_id.to_string(),
                ..Default::default()
            });
        element.original_content_code = Some(code.to_string());
        element.original_content = Some(original_content.to_string());
        element.html_content = Some(html_content.to_string());
        element
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresentationConfiguration {
    pub id: i64,
    pub document: HtmlDocument,
    pub presentation_file: Option<PathBuf>,
    pub custom_resources: Vec<Resource>,
    pub variables: Vec<Variable>,
    slides: Vec<Slide>,
}

impl PresentationConfiguration {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn has_slides(&self) -> bool {
        !self.slides.is_empty()
    }

    pub fn slides(&self) -> &[Slide] {
        &self.slides
    }

    pub fn slide_index(&self, slide_number: &str) -> Option<usize> {
        self.slides.iter().position(|s| s.slide_number == slide_number)
    }

    pub fn slide_by_id(&self, id: &str) -> Option<&Slide> {
        self.slides.iter().find(|s| s.id == id)
    }

    pub fn slide_by_number(&self, slide_number: &str) -> Option<&Slide> {
        self.slides.iter().find(|s| s.slide_number == slide_number)
    }

    pub fn slide_by_number_mut(&mut self, slide_number: &str) -> Option<&mut Slide> {
        self.slides.iter_mut().find(|s| s.slide_number == slide_number)
    }

    pub fn slide_by_id_mut(&mut self, id: &str) -> Option<&mut Slide> {
        self.slides.iter_mut().find(|s| s.id == id)
    }

    pub fn first_slide(&self) -> Option<&Slide> {
        self.slides.first()
    }

    pub fn last_slide(&self) -> Option<&Slide> {
        self.slides.last()
    }

    pub fn slide_before(&self, slide_number: &str) -> Option<&Slide> {
        let index = self.slide_index(slide_number)?;
        index.checked_sub(1).and_then(|i| self.slides.get(i))
    }

    pub fn slide_after(&self, slide_number: &str) -> Option<&Slide> {
        let index = self.slide_index(slide_number)?;
        self.slides.get(index + 1)
    }

    /// Fails when `slide` shares its number or id with a slide already listed.
    pub fn check_new_slide(&self, slide: &Slide) -> Result<(), EngineError> {
        if self.slide_by_number(&slide.slide_number).is_some() {
            return Err(EngineError::Document(format!(
                "A slide with number {} already exists",
                slide.slide_number
            )));
        }
        if !slide.id.is_empty() && self.slide_by_id(&slide.id).is_some() {
            return Err(EngineError::Document(format!("A slide with id {} already exists", slide.id)));
        }
        Ok(())
    }

    /// Appends `slide`. Ids and numbers must stay unique.
    pub fn add_slide(&mut self, slide: Slide) -> Result<(), EngineError> {
        let index = self.slides.len();
        self.insert_slide(index, slide)
    }

    pub fn insert_slide(&mut self, index: usize, slide: Slide) -> Result<(), EngineError> {
        self.check_new_slide(&slide)?;
        let index = index.min(self.slides.len());
        self.slides.insert(index, slide);
        Ok(())
    }

    pub fn remove_slide(&mut self, slide_number: &str) -> Option<Slide> {
        let index = self.slide_index(slide_number)?;
        Some(self.slides.remove(index))
    }

    /// Moves slide `slide_number` right before `before_number`, or to the end
    /// when `before_number` is `None`. Returns `false` if a slide is unknown.
    pub fn move_slide(&mut self, slide_number: &str, before_number: Option<&str>) -> bool {
        if before_number == Some(slide_number) {
            return true;
        }
        if let Some(before) = before_number {
            if self.slide_index(before).is_none() {
                return false;
            }
        }
        let Some(slide) = self.remove_slide(slide_number) else {
            return false;
        };
        let index = before_number
            .and_then(|before| self.slide_index(before))
            .unwrap_or(self.slides.len());
        self.slides.insert(index, slide);
        true
    }

    pub fn update_slide_thumbnail(&mut self, slide_number: &str, image: RgbaImage) -> bool {
        match self.slide_by_number_mut(slide_number) {
            Some(slide) => {
                slide.thumbnail = Some(image);
                trace!(slide = %slide_number, "Slide's thumbnail updated");
                true
            }
            None => false,
        }
    }

    pub fn set_variable(&mut self, name: &str, value: &str) {
        self.variables.set_variable(name, value);
    }

    /// Adds a resource unless its content is blank or already present.
    pub fn add_custom_resource(&mut self, resource: Resource) -> bool {
        if resource.content.trim().is_empty() || self.custom_resources.contains(&resource) {
            return false;
        }
        self.custom_resources.push(resource);
        true
    }

    /// Writes the variable-free content of every element of `slide` into the
    /// document node carrying the element id.
    pub fn update_slide_in_document(&mut self, slide: &Slide) -> Result<(), EngineError> {
        for element in slide.elements() {
            let html = element.cleared_html_content(&self.variables);
            if !self.document.set_inner_html(&element.id, &html) {
                return Err(EngineError::Document(format!(
                    "No element with id {} in the presentation document",
                    element.id
                )));
            }
        }
        Ok(())
    }

    /// Upserts the element on slide `slide_number` and refreshes the document.
    pub fn update_element(
        &mut self,
        slide_number: &str,
        element_id: &str,
        code: &str,
        original_content: &str,
        html_content: &str,
    ) -> Result<(), EngineError> {
        if !self.document.contains_id(element_id) {
            return Err(EngineError::Document(format!(
                "No element with id {} in the presentation document",
                element_id
            )));
        }
        let slide = self
            .slides
            .iter_mut()
            .find(|s| s.slide_number == slide_number)
            .ok_or_else(|| EngineError::Document(format!("No slide with number {}", slide_number)))?;
        slide.update_element(element_id, code, original_content, html_content);

        let html = substitute(html_content, &self.variables);
        self.document.set_inner_html(element_id, &html);
        Ok(())
    }
}
