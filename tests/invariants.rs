//! Contract Invariant Tests
//!
//! These tests verify the guarantees callers rely on: configuration
//! round-trips, slide ordering, idempotent element updates, pure
//! substitution and snapshot cascade termination.

use std::fs;
use std::path::{Path, PathBuf};

use image::RgbaImage;
use sfx_engine::{
    archive::zip_directory,
    substitute, CaptureError, DynamicAttribute, Engine, EngineError, HtmlDocument,
    PresentationConfiguration, PresentationEngine, PresentationOutline, Resource, ResourceType,
    Settings, Slide, SlideElementTemplate, SlideRenderer, SlideTemplate, TemplateConfiguration,
    TemplateEngine, Variable,
};
use tempfile::tempdir;

fn create_test_template(working_directory: &Path) -> TemplateConfiguration {
    let slides = working_directory.join("slides/template");
    TemplateConfiguration {
        name: "Test Template".to_string(),
        version: Some("1.2".to_string()),
        file: Some(working_directory.join("template.html")),
        js_object: "sfx".to_string(),
        resources_directory: Some(working_directory.join("resources")),
        default_variables: vec![Variable::new("author", "Ada\nLovelace")],
        slides_container: "slides".to_string(),
        slide_id_prefix: "slide-".to_string(),
        slides_template_directory: Some(slides.clone()),
        slides_presentation_directory: Some(working_directory.join("slides/presentation")),
        slides_thumbnail_directory: Some(working_directory.join("slides/thumbnails")),
        slide_templates: vec![
            SlideTemplate {
                id: 1,
                name: "Title".to_string(),
                file: Some(slides.join("title.html")),
                dynamic_attributes: vec![DynamicAttribute {
                    attribute: "data-background".to_string(),
                    prompt_message: "Background color?".to_string(),
                    template_expression: "background".to_string(),
                }],
                elements: vec![SlideElementTemplate {
                    id: 1,
                    html_id: "title".to_string(),
                    default_content: "Untitled".to_string(),
                }],
            },
            SlideTemplate {
                id: 2,
                name: "Blank".to_string(),
                file: Some(slides.join("blank.html")),
                dynamic_attributes: vec![],
                elements: vec![],
            },
        ],
    }
}

fn create_test_presentation() -> PresentationConfiguration {
    let mut configuration = PresentationConfiguration::new(1_700_000_000_000);
    configuration.variables = vec![Variable::new("event", "RustConf"), Variable::new("year", "2024")];
    configuration.add_custom_resource(Resource::new(ResourceType::Css, "h1 { color: red; }"));
    configuration.add_custom_resource(Resource::new(ResourceType::JavascriptFile, "deck.js"));

    for (id, number) in [("s1", "s1"), ("s2", "s2"), ("s3", "s3")] {
        let mut slide = Slide::new(id, number).with_template(1);
        slide.set_speaker_notes(Some("Welcome to ${event}"));
        slide
            .update_element(&format!("{}-title", id), "MARKDOWN", "# ${event}", "<h1>${event}</h1>")
            .template_id = Some(1);
        configuration.add_slide(slide).unwrap();
    }
    configuration
}

#[test]
fn invariant_template_round_trip() {
    let dir = tempdir().unwrap();
    let mut engine = TemplateEngine::new();
    engine.set_working_directory(Some(dir.path().to_path_buf()));
    let model = create_test_template(dir.path());
    engine.set_configuration(model.clone());

    let mut written = vec![];
    engine.write_configuration_to(&mut written).unwrap();
    let read = engine.read_configuration_from(written.as_slice()).unwrap();

    assert_eq!(read, model);
    assert_eq!(read.slide_templates.len(), 2);
    assert_eq!(read.slide_template(1).unwrap().elements[0].default_content, "Untitled");
}

#[test]
fn invariant_presentation_round_trip() {
    let dir = tempdir().unwrap();
    let mut engine = PresentationEngine::new();
    engine.set_working_directory(Some(dir.path().to_path_buf()));
    let model = create_test_presentation();
    engine.set_configuration(model.clone());

    let mut written = vec![];
    engine.write_configuration_to(&mut written).unwrap();
    let read = engine.read_configuration_from(written.as_slice()).unwrap();

    assert_eq!(read.id, model.id);
    assert_eq!(read.slides(), model.slides());
    assert_eq!(read.variables, model.variables);
    assert_eq!(read.custom_resources.len(), 2);
    for (read, original) in read.custom_resources.iter().zip(&model.custom_resources) {
        assert_eq!(read.resource_type, original.resource_type);
        assert_eq!(read.content, original.content);
    }
    assert_eq!(read.presentation_file, Some(dir.path().join("presentation.html")));
}

#[test]
fn invariant_stored_values_are_base64() {
    let dir = tempdir().unwrap();
    let mut engine = PresentationEngine::new();
    engine.set_working_directory(Some(dir.path().to_path_buf()));
    engine.set_configuration(create_test_presentation());

    let mut written = vec![];
    engine.write_configuration_to(&mut written).unwrap();
    let json: serde_json::Value = serde_json::from_slice(&written).unwrap();

    let presentation = &json["presentation"];
    assert_eq!(presentation["variables"][0]["value"], "UnVzdENvbmY=");
    assert_eq!(presentation["custom-resources"][1]["type"], "JAVASCRIPT_FILE");
    assert_eq!(presentation["slides"][0]["template-id"], 1);
    assert_eq!(presentation["slides"][0]["elements"][0]["original-content-code"], "MARKDOWN");
    assert!(!written.windows(8).any(|w| w == b"${event}"));
}

#[test]
fn invariant_slide_order_example() {
    let configuration = create_test_presentation();

    assert_eq!(configuration.slide_before("s2").unwrap().id, "s1");
    assert!(configuration.slide_after("s3").is_none());
    assert_eq!(configuration.first_slide().unwrap().id, "s1");
}

#[test]
fn invariant_list_order_is_authoritative() {
    let mut configuration = PresentationConfiguration::new(1);
    for number in ["900", "7", "zz", "100", "a1", "3"] {
        configuration.add_slide(Slide::new(format!("id-{}", number), number)).unwrap();
    }
    configuration.move_slide("3", Some("900"));
    configuration.move_slide("zz", None);
    configuration.remove_slide("100");

    let slides = configuration.slides();
    assert_eq!(configuration.first_slide(), slides.first());
    assert_eq!(configuration.last_slide(), slides.last());
    for pair in slides.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        assert_eq!(configuration.slide_after(&a.slide_number), Some(b));
        assert_eq!(configuration.slide_before(&b.slide_number), Some(a));
    }
    let numbers: Vec<_> = slides.iter().map(|s| s.slide_number.as_str()).collect();
    assert_eq!(numbers, ["3", "900", "7", "a1", "zz"]);
}

#[test]
fn invariant_duplicate_slide_numbers_rejected() {
    let mut configuration = create_test_presentation();
    let result = configuration.add_slide(Slide::new("s4", "s2"));
    assert!(matches!(result, Err(EngineError::Document(_))));
    assert_eq!(configuration.slides().len(), 3);
}

#[test]
fn invariant_update_element_idempotent() {
    let mut slide = Slide::new("s1", "1");
    slide.update_element("body", "HTML", "<p>x</p>", "<p>x</p>");
    let once = slide.clone();
    slide.update_element("body", "HTML", "<p>x</p>", "<p>x</p>");

    assert_eq!(slide, once);
    assert_eq!(slide.element_count(), 1);
}

#[test]
fn invariant_substitution_is_pure() {
    let mut configuration = create_test_presentation();
    configuration.document = HtmlDocument::parse(
        r#"<div id="slides"><section id="s1"><h1 id="s1-title"></h1></section></div>"#,
    );
    let variables = configuration.variables.clone();
    let slide = configuration.slide_by_id("s1").unwrap().clone();

    configuration.update_slide_in_document(&slide).unwrap();
    configuration.update_slide_in_document(&slide).unwrap();

    assert_eq!(configuration.document.inner_html("s1-title"), Some("<h1>RustConf</h1>"));
    assert_eq!(configuration.variables, variables);
    assert_eq!(
        configuration.slide_by_id("s1").unwrap().element("s1-title").unwrap().html_content.as_deref(),
        Some("<h1>${event}</h1>")
    );
    let html = "${event} ${year} ${unknown}";
    assert_eq!(substitute(html, &variables), substitute(html, &variables));
    assert_eq!(substitute(html, &variables), "RustConf 2024 ${unknown}");
}

#[test]
fn invariant_extension_checked_before_io() {
    let mut engine = PresentationEngine::new();

    let err = engine.load_archive(Path::new("/nowhere/deck.zip")).unwrap_err();
    assert!(matches!(err, EngineError::InvalidArchive(_)));
    assert!(err.to_string().contains("extension"));

    let err = engine.load_archive(Path::new("/nowhere/deck.sfx")).unwrap_err();
    assert!(matches!(err, EngineError::InvalidArchive(_)));
    assert!(engine.working_directory().is_none());
}

#[test]
fn invariant_malformed_configuration_in_archive() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("source");
    fs::create_dir_all(&source).unwrap();
    fs::write(source.join("template-config.json"), r#"{ "template": { "file": "t.html" } }"#).unwrap();
    let archive = dir.path().join("broken.sfxt");
    zip_directory(&source, &archive).unwrap();

    let mut engine = TemplateEngine::new();
    engine.core_mut().set_temp_root(dir.path().join("work"));
    let result = engine.load_archive(&archive);

    assert!(matches!(result, Err(EngineError::MalformedConfiguration(_))));
    assert!(engine.configuration().is_none());
}

#[test]
fn invariant_template_archive_save_then_load() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("source");
    fs::create_dir_all(source.join("slides/template")).unwrap();
    fs::write(source.join("template.html"), "<html><head></head><body></body></html>").unwrap();

    let mut engine = TemplateEngine::new();
    engine.core_mut().set_temp_root(dir.path().join("work"));
    engine.set_working_directory(Some(source.clone()));
    engine.set_configuration(create_test_template(&source));

    let archive = dir.path().join("test.sfxt");
    engine.save_archive(&archive).unwrap();

    let mut reloaded = TemplateEngine::new();
    reloaded.core_mut().set_temp_root(dir.path().join("work"));
    reloaded.load_archive(&archive).unwrap();

    let working_directory: PathBuf = reloaded.working_directory().unwrap().to_path_buf();
    assert_ne!(working_directory, source);
    assert!(working_directory.join("template.html").is_file());
    assert_eq!(reloaded.configuration(), Some(&create_test_template(&working_directory)));
}

struct CountingRenderer {
    fail_capture_at: Option<usize>,
    captures: usize,
    current: Option<String>,
    captured_slides: Vec<String>,
}

impl CountingRenderer {
    fn new(fail_capture_at: Option<usize>) -> Self {
        Self {
            fail_capture_at,
            captures: 0,
            current: None,
            captured_slides: vec![],
        }
    }
}

impl SlideRenderer for CountingRenderer {
    fn open_surface(&mut self, _presentation_file: &Path) -> Result<(), CaptureError> {
        Ok(())
    }

    fn navigate_to(&mut self, slide_id: &str) -> Result<(), CaptureError> {
        self.current = Some(slide_id.to_string());
        Ok(())
    }

    fn capture_image(&mut self) -> Result<RgbaImage, CaptureError> {
        self.captures += 1;
        if Some(self.captures) == self.fail_capture_at {
            return Err(CaptureError::Capture("renderer crashed".to_string()));
        }
        self.captured_slides.extend(self.current.clone());
        Ok(RgbaImage::new(4, 3))
    }

    fn close_surface(&mut self) {}
}

fn presentation_with(count: usize) -> PresentationConfiguration {
    let mut configuration = PresentationConfiguration::new(1);
    configuration.presentation_file = Some(PathBuf::from("presentation.html"));
    for index in 0..count {
        let id = format!("slide-{}", index);
        configuration.add_slide(Slide::new(id, format!("{}", 1000 - index))).unwrap();
    }
    configuration
}

#[tokio::test(start_paused = true)]
async fn invariant_cascade_visits_every_slide_once() {
    let mut presentation = presentation_with(5);
    let mut outline = PresentationOutline::new(CountingRenderer::new(None), &Settings::default());

    let captured = outline.load_all_slides(&mut presentation).await.unwrap();

    assert_eq!(captured, 5);
    let expected: Vec<_> = presentation.slides().iter().map(|s| s.id.clone()).collect();
    assert_eq!(outline.renderer().captured_slides, expected);
    assert!(!outline.is_loading());
}

#[tokio::test(start_paused = true)]
async fn invariant_cascade_stops_at_first_capture_failure() {
    let mut presentation = presentation_with(5);
    let mut outline = PresentationOutline::new(CountingRenderer::new(Some(3)), &Settings::default());

    let captured = outline.load_all_slides(&mut presentation).await.unwrap();

    assert_eq!(captured, 2);
    assert_eq!(outline.renderer().captures, 3);
    assert_eq!(outline.renderer().captured_slides, ["slide-0", "slide-1"]);
    assert!(outline.previews()[2..].iter().all(|p| p.image.is_none()));
}
