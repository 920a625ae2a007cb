//! Snapshot Cascade - Slide Previews
//!
//! Previews are captured one slide at a time: navigate, let the slide settle,
//! capture, then move on to the next slide. The cascade is a plain state
//! machine driven by [`SnapshotCascade::step`]; waiting is returned to the
//! caller as [`CascadeStep::Wait`] so that the machine itself never sleeps.
//!
//! Rendering is abstracted behind [`SlideRenderer`]. A failed navigation or
//! capture ends the whole cascade.

use std::path::Path;
use std::time::Duration;

use image::RgbaImage;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::presentation::PresentationConfiguration;
use crate::settings::Settings;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Can not open the rendering surface: {0}")]
    Surface(String),

    #[error("Can not navigate to slide {slide}: {reason}")]
    Navigation { slide: String, reason: String },

    #[error("Can not capture the slide: {0}")]
    Capture(String),
}

/// Off-screen surface displaying the presentation file.
pub trait SlideRenderer {
    fn open_surface(&mut self, presentation_file: &Path) -> Result<(), CaptureError>;
    fn navigate_to(&mut self, slide_id: &str) -> Result<(), CaptureError>;
    fn capture_image(&mut self) -> Result<RgbaImage, CaptureError>;
    fn close_surface(&mut self);
}

/// Slide ids are carried by every state but `Idle` and `Done`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CascadeState {
    Idle,
    Loading(String),
    Settling(String),
    Capturing(String),
    Advancing(String),
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeStep {
    Continue,
    Wait(Duration),
    Finished,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlidePreview {
    pub slide_id: String,
    pub image: Option<RgbaImage>,
    /// Width over height of the captured image.
    pub aspect_ratio: Option<f64>,
}

impl SlidePreview {
    pub fn new(slide_id: impl Into<String>) -> Self {
        Self {
            slide_id: slide_id.into(),
            ..Default::default()
        }
    }

    pub fn set_image(&mut self, image: RgbaImage) {
        let (width, height) = image.dimensions();
        self.aspect_ratio = (height > 0).then(|| f64::from(width) / f64::from(height));
        self.image = Some(image);
    }

    /// Height keeping the captured ratio for a preview `width` wide.
    pub fn fit_height(&self, width: f64) -> Option<f64> {
        self.aspect_ratio.filter(|ratio| *ratio > 0.0).map(|ratio| width / ratio)
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotCascade {
    state: CascadeState,
    start_slide_id: String,
    recursive: bool,
    delay: Duration,
    persist_thumbnails: bool,
    captured: usize,
}

impl SnapshotCascade {
    /// `recursive` cascades walk from `start_slide_id` to the last slide.
    pub fn new(start_slide_id: impl Into<String>, recursive: bool, settings: &Settings) -> Self {
        Self {
            state: CascadeState::Idle,
            start_slide_id: start_slide_id.into(),
            recursive,
            delay: settings.snapshot_delay(),
            persist_thumbnails: settings.persist_thumbnails,
            captured: 0,
        }
    }

    pub fn state(&self) -> &CascadeState {
        &self.state
    }

    pub fn is_done(&self) -> bool {
        self.state == CascadeState::Done
    }

    /// Number of slides captured so far.
    pub fn captured(&self) -> usize {
        self.captured
    }

    pub fn step<R: SlideRenderer + ?Sized>(
        &mut self,
        renderer: &mut R,
        presentation: &mut PresentationConfiguration,
        previews: &mut [SlidePreview],
    ) -> CascadeStep {
        let state = std::mem::replace(&mut self.state, CascadeState::Done);
        match state {
            CascadeState::Idle => {
                self.state = CascadeState::Loading(self.start_slide_id.clone());
                CascadeStep::Continue
            }
            CascadeState::Loading(slide_id) => {
                if presentation.slide_by_id(&slide_id).is_none() {
                    warn!(slide = %slide_id, "Slide disappeared before its snapshot");
                    return self.finish(renderer);
                }
                match renderer.navigate_to(&slide_id) {
                    Ok(()) => {
                        self.state = CascadeState::Settling(slide_id);
                        CascadeStep::Continue
                    }
                    Err(e) => {
                        error!(slide = %slide_id, error = %e, "Can't display slide for its snapshot");
                        self.finish(renderer)
                    }
                }
            }
            CascadeState::Settling(slide_id) => {
                self.state = CascadeState::Capturing(slide_id);
                CascadeStep::Wait(self.delay)
            }
            CascadeState::Capturing(slide_id) => self.capture(slide_id, renderer, presentation, previews),
            CascadeState::Advancing(slide_id) => {
                let next = self
                    .recursive
                    .then(|| presentation.slide_by_id(&slide_id))
                    .flatten()
                    .and_then(|slide| presentation.slide_after(&slide.slide_number))
                    .map(|slide| slide.id.clone());
                match next {
                    Some(next) => {
                        self.state = CascadeState::Loading(next);
                        CascadeStep::Continue
                    }
                    None => self.finish(renderer),
                }
            }
            CascadeState::Done => CascadeStep::Finished,
        }
    }

    fn capture<R: SlideRenderer + ?Sized>(
        &mut self,
        slide_id: String,
        renderer: &mut R,
        presentation: &mut PresentationConfiguration,
        previews: &mut [SlidePreview],
    ) -> CascadeStep {
        let Some(slide_number) = presentation.slide_by_id(&slide_id).map(|s| s.slide_number.clone()) else {
            warn!(slide = %slide_id, "Slide removed while its snapshot was pending");
            return self.finish(renderer);
        };
        let Some(preview) = previews.iter_mut().find(|p| p.slide_id == slide_id) else {
            warn!(slide = %slide_id, "No preview for slide");
            return self.finish(renderer);
        };

        match renderer.capture_image() {
            Ok(image) => {
                if self.persist_thumbnails {
                    presentation.update_slide_thumbnail(&slide_number, image.clone());
                }
                preview.set_image(image);
                self.captured += 1;
                debug!(slide = %slide_id, "Snapshot taken");
                self.state = CascadeState::Advancing(slide_id);
                CascadeStep::Continue
            }
            Err(e) => {
                error!(slide = %slide_id, error = %e, "Can't take snapshot of slide");
                self.finish(renderer)
            }
        }
    }

    fn finish<R: SlideRenderer + ?Sized>(&mut self, renderer: &mut R) -> CascadeStep {
        self.state = CascadeState::Done;
        renderer.close_surface();
        CascadeStep::Finished
    }
}

/// Ordered slide previews of one presentation, refreshed by snapshot
/// cascades. At most one cascade is active at a time.
#[derive(Debug)]
pub struct PresentationOutline<R> {
    renderer: R,
    settings: Settings,
    previews: Vec<SlidePreview>,
    active: Option<SnapshotCascade>,
    surface_open: bool,
    last_captured: usize,
}

impl<R: SlideRenderer> PresentationOutline<R> {
    pub fn new(renderer: R, settings: &Settings) -> Self {
        Self {
            renderer,
            settings: settings.clone(),
            previews: vec![],
            active: None,
            surface_open: false,
            last_captured: 0,
        }
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn previews(&self) -> &[SlidePreview] {
        &self.previews
    }

    pub fn preview(&self, slide_id: &str) -> Option<&SlidePreview> {
        self.previews.iter().find(|p| p.slide_id == slide_id)
    }

    pub fn is_loading(&self) -> bool {
        self.active.is_some()
    }

    /// Drops every preview and any running cascade.
    pub fn reset(&mut self) {
        self.cancel();
        self.previews.clear();
    }

    /// Inserts a preview for `slide_id` before the preview of the slide that
    /// follows it, then schedules its snapshot.
    pub fn add_preview(
        &mut self,
        presentation: &PresentationConfiguration,
        slide_id: &str,
    ) -> Result<bool, CaptureError> {
        let Some(slide) = presentation.slide_by_id(slide_id) else {
            return Ok(false);
        };
        if self.preview(slide_id).is_none() {
            let index = presentation
                .slide_after(&slide.slide_number)
                .and_then(|after| self.previews.iter().position(|p| p.slide_id == after.id))
                .unwrap_or(self.previews.len());
            self.previews.insert(index, SlidePreview::new(slide_id));
        }
        self.begin_update_preview(presentation, slide_id)
    }

    pub fn delete_preview(&mut self, slide_id: &str) -> Option<SlidePreview> {
        let index = self.previews.iter().position(|p| p.slide_id == slide_id)?;
        Some(self.previews.remove(index))
    }

    /// Rebuilds every preview and starts a cascade from the first slide.
    /// Returns `false` for a presentation without slides.
    pub fn begin_load_all(&mut self, presentation: &PresentationConfiguration) -> Result<bool, CaptureError> {
        self.reset();
        let Some(first) = presentation.first_slide() else {
            return Ok(false);
        };
        self.previews = presentation.slides().iter().map(|s| SlidePreview::new(s.id.clone())).collect();

        self.restart_surface(presentation)?;
        self.active = Some(SnapshotCascade::new(first.id.clone(), true, &self.settings));
        Ok(true)
    }

    /// Starts a cascade refreshing the preview of `slide_id` only.
    pub fn begin_update_preview(
        &mut self,
        presentation: &PresentationConfiguration,
        slide_id: &str,
    ) -> Result<bool, CaptureError> {
        if presentation.slide_by_id(slide_id).is_none() || self.preview(slide_id).is_none() {
            return Ok(false);
        }
        self.restart_surface(presentation)?;
        self.active = Some(SnapshotCascade::new(slide_id, false, &self.settings));
        Ok(true)
    }

    /// Advances the active cascade by one transition.
    pub fn step(&mut self, presentation: &mut PresentationConfiguration) -> CascadeStep {
        let Some(cascade) = self.active.as_mut() else {
            return CascadeStep::Finished;
        };
        let step = cascade.step(&mut self.renderer, presentation, &mut self.previews);
        if step == CascadeStep::Finished {
            self.last_captured = cascade.captured();
            self.active = None;
            self.surface_open = false;
        }
        step
    }

    /// Drives the active cascade to its end, sleeping through settle delays.
    /// Returns the number of slides captured.
    pub async fn run(&mut self, presentation: &mut PresentationConfiguration) -> usize {
        self.last_captured = 0;
        loop {
            match self.step(presentation) {
                CascadeStep::Continue => {}
                CascadeStep::Wait(delay) => tokio::time::sleep(delay).await,
                CascadeStep::Finished => return self.last_captured,
            }
        }
    }

    pub async fn load_all_slides(
        &mut self,
        presentation: &mut PresentationConfiguration,
    ) -> Result<usize, CaptureError> {
        if !self.begin_load_all(presentation)? {
            return Ok(0);
        }
        Ok(self.run(presentation).await)
    }

    pub async fn update_preview(
        &mut self,
        presentation: &mut PresentationConfiguration,
        slide_id: &str,
    ) -> Result<usize, CaptureError> {
        if !self.begin_update_preview(presentation, slide_id)? {
            return Ok(0);
        }
        Ok(self.run(presentation).await)
    }

    fn cancel(&mut self) {
        if self.active.take().is_some() {
            debug!("Snapshot cascade discarded");
        }
        if self.surface_open {
            self.renderer.close_surface();
            self.surface_open = false;
        }
    }

    fn restart_surface(&mut self, presentation: &PresentationConfiguration) -> Result<(), CaptureError> {
        self.cancel();
        let file = presentation
            .presentation_file
            .as_deref()
            .ok_or_else(|| CaptureError::Surface("the presentation has no file".to_string()))?;
        self.renderer.open_surface(file)?;
        self.surface_open = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presentation::Slide;
    use std::path::PathBuf;

    #[derive(Debug, Default)]
    struct FakeRenderer {
        opened: usize,
        closed: usize,
        visited: Vec<String>,
        fail_navigation_on: Option<String>,
        fail_capture_on: Option<String>,
        current: Option<String>,
    }

    impl SlideRenderer for FakeRenderer {
        fn open_surface(&mut self, _presentation_file: &Path) -> Result<(), CaptureError> {
            self.opened += 1;
            Ok(())
        }

        fn navigate_to(&mut self, slide_id: &str) -> Result<(), CaptureError> {
            self.visited.push(slide_id.to_string());
            if self.fail_navigation_on.as_deref() == Some(slide_id) {
                return Err(CaptureError::Navigation {
                    slide: slide_id.to_string(),
                    reason: "unreachable".to_string(),
                });
            }
            self.current = Some(slide_id.to_string());
            Ok(())
        }

        fn capture_image(&mut self) -> Result<RgbaImage, CaptureError> {
            if self.current.is_some() && self.current == self.fail_capture_on {
                return Err(CaptureError::Capture("blank surface".to_string()));
            }
            Ok(RgbaImage::new(16, 8))
        }

        fn close_surface(&mut self) {
            self.closed += 1;
        }
    }

    fn presentation() -> PresentationConfiguration {
        let mut configuration = PresentationConfiguration::new(1);
        configuration.presentation_file = Some(PathBuf::from("/tmp/presentation.html"));
        for (id, number) in [("s1", "10"), ("s2", "2"), ("s3", "30")] {
            configuration.add_slide(Slide::new(id, number)).unwrap();
        }
        configuration
    }

    fn captured_ids<R: SlideRenderer>(outline: &PresentationOutline<R>) -> Vec<&str> {
        outline
            .previews()
            .iter()
            .filter(|p| p.image.is_some())
            .map(|p| p.slide_id.as_str())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_all_visits_every_slide_in_order() {
        let mut presentation = presentation();
        let mut outline = PresentationOutline::new(FakeRenderer::default(), &Settings::default());

        let start = tokio::time::Instant::now();
        let captured = outline.load_all_slides(&mut presentation).await.unwrap();

        assert_eq!(captured, 3);
        assert_eq!(outline.renderer().visited, ["s1", "s2", "s3"]);
        assert_eq!(captured_ids(&outline), ["s1", "s2", "s3"]);
        assert!(start.elapsed() >= Duration::from_millis(1500));
        assert_eq!(outline.renderer().opened, 1);
        assert_eq!(outline.renderer().closed, 1);
        assert!(!outline.is_loading());

        let preview = outline.preview("s2").unwrap();
        assert_eq!(preview.aspect_ratio, Some(2.0));
        assert_eq!(preview.fit_height(160.0), Some(80.0));
        assert!(presentation.slide_by_id("s2").unwrap().thumbnail.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigation_failure_stops_cascade() {
        let mut presentation = presentation();
        let renderer = FakeRenderer {
            fail_navigation_on: Some("s2".to_string()),
            ..Default::default()
        };
        let mut outline = PresentationOutline::new(renderer, &Settings::default());

        let captured = outline.load_all_slides(&mut presentation).await.unwrap();

        assert_eq!(captured, 1);
        assert_eq!(outline.renderer().visited, ["s1", "s2"]);
        assert_eq!(captured_ids(&outline), ["s1"]);
        assert_eq!(outline.renderer().closed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_failure_stops_cascade() {
        let mut presentation = presentation();
        let renderer = FakeRenderer {
            fail_capture_on: Some("s1".to_string()),
            ..Default::default()
        };
        let mut outline = PresentationOutline::new(renderer, &Settings::default());

        assert_eq!(outline.load_all_slides(&mut presentation).await.unwrap(), 0);
        assert_eq!(outline.renderer().visited, ["s1"]);
        assert!(captured_ids(&outline).is_empty());
        assert_eq!(outline.previews().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_preview_is_not_recursive() {
        let mut presentation = presentation();
        let settings = Settings {
            persist_thumbnails: true,
            ..Settings::default()
        };
        let mut outline = PresentationOutline::new(FakeRenderer::default(), &settings);
        outline.load_all_slides(&mut presentation).await.unwrap();

        let captured = outline.update_preview(&mut presentation, "s2").await.unwrap();

        assert_eq!(captured, 1);
        assert_eq!(outline.renderer().visited, ["s1", "s2", "s3", "s2"]);
        assert_eq!(outline.renderer().opened, 2);
        assert_eq!(
            presentation.slide_by_id("s2").unwrap().thumbnail.as_ref().map(|t| t.dimensions()),
            Some((16, 8))
        );
        assert_eq!(outline.update_preview(&mut presentation, "missing").await.unwrap(), 0);
    }

    #[test]
    fn test_settle_delay_is_returned_not_slept() {
        let mut presentation = presentation();
        let settings = Settings {
            snapshot_delay_ms: 250,
            ..Settings::default()
        };
        let mut outline = PresentationOutline::new(FakeRenderer::default(), &settings);
        assert!(!outline.begin_update_preview(&presentation, "s1").unwrap());

        assert!(outline.begin_load_all(&presentation).unwrap());
        assert_eq!(outline.step(&mut presentation), CascadeStep::Continue);
        assert_eq!(outline.step(&mut presentation), CascadeStep::Continue);
        assert_eq!(outline.step(&mut presentation), CascadeStep::Wait(Duration::from_millis(250)));
    }

    #[test]
    fn test_slide_removed_while_settling() {
        let mut presentation = presentation();
        let mut outline = PresentationOutline::new(FakeRenderer::default(), &Settings::default());
        outline.begin_load_all(&presentation).unwrap();

        // Idle -> Loading -> Settling -> Capturing
        outline.step(&mut presentation);
        outline.step(&mut presentation);
        assert!(matches!(outline.step(&mut presentation), CascadeStep::Wait(_)));

        presentation.remove_slide("10");
        outline.delete_preview("s1");

        assert_eq!(outline.step(&mut presentation), CascadeStep::Finished);
        assert!(!outline.is_loading());
        assert_eq!(outline.renderer().visited, ["s1"]);
        assert_eq!(outline.renderer().closed, 1);
        assert_eq!(outline.step(&mut presentation), CascadeStep::Finished);
    }

    #[test]
    fn test_new_cascade_discards_previous() {
        let mut presentation = presentation();
        let mut outline = PresentationOutline::new(FakeRenderer::default(), &Settings::default());
        outline.begin_load_all(&presentation).unwrap();
        outline.step(&mut presentation);
        outline.step(&mut presentation);

        assert!(outline.begin_update_preview(&presentation, "s3").unwrap());
        assert_eq!(outline.renderer().opened, 2);
        assert_eq!(outline.renderer().closed, 1);

        while outline.step(&mut presentation) != CascadeStep::Finished {}
        assert_eq!(outline.renderer().visited, ["s1", "s3"]);
        assert_eq!(captured_ids(&outline), ["s3"]);
    }

    #[test]
    fn test_preview_slots_follow_presentation_order() {
        let mut presentation = presentation();
        let mut outline = PresentationOutline::new(FakeRenderer::default(), &Settings::default());
        outline.begin_load_all(&presentation).unwrap();
        outline.reset();
        assert!(outline.previews().is_empty());
        assert_eq!(outline.renderer().closed, 1);

        outline.add_preview(&presentation, "s1").unwrap();
        outline.add_preview(&presentation, "s3").unwrap();
        outline.add_preview(&presentation, "s2").unwrap();
        let order: Vec<_> = outline.previews().iter().map(|p| p.slide_id.as_str()).collect();
        assert_eq!(order, ["s1", "s2", "s3"]);
        assert!(!outline.add_preview(&presentation, "missing").unwrap());

        while outline.step(&mut presentation) != CascadeStep::Finished {}
        assert_eq!(captured_ids(&outline), ["s2"]);
    }

    #[tokio::test]
    async fn test_empty_presentation_loads_nothing() {
        let mut presentation = PresentationConfiguration::new(1);
        let mut outline = PresentationOutline::new(FakeRenderer::default(), &Settings::default());
        assert_eq!(outline.load_all_slides(&mut presentation).await.unwrap(), 0);
        assert_eq!(outline.renderer().opened, 0);
    }
}
