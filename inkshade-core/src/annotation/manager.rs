use std::collections::{HashMap, HashSet};

use anyhow::anyhow;
use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::history::{Command, History, DEFAULT_HISTORY_LIMIT};
use super::model::{
    validate_geometry, Annotation, AnnotationGeometry, AnnotationId, AnnotationKind,
    GeometryInput, Modification, PageQuads,
};
use super::native::{from_native, to_native};
use crate::backend::DocumentBackend;
use crate::error::{CoreError, CoreResult};
use crate::geometry::{Color, Point};
use crate::selection::LayoutSource;

pub const DEFAULT_STROKE_WIDTH: f32 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnnotationStyle {
    pub color: Color,
    pub stroke_width: Option<f32>,
    pub filled: bool,
}

impl From<Color> for AnnotationStyle {
    fn from(color: Color) -> Self {
        Self {
            color,
            stroke_width: None,
            filled: false,
        }
    }
}

impl AnnotationStyle {
    pub fn with_stroke(mut self, width: f32) -> Self {
        self.stroke_width = Some(width);
        self
    }

    pub fn filled(mut self, filled: bool) -> Self {
        self.filled = filled;
        self
    }
}

#[derive(Debug, Default)]
pub struct ExportReport {
    pub written: usize,
    pub removed: usize,
    pub failures: Vec<(AnnotationId, CoreError)>,
}

impl ExportReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Outcome of an import. Pages whose annotations could not be read are
/// listed in `failures` and contribute nothing.
#[derive(Debug, Default)]
pub struct ImportReport {
    pub imported: usize,
    pub failures: Vec<(usize, CoreError)>,
}

impl ImportReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug)]
pub struct AnnotationManager {
    items: Vec<Annotation>,
    history: History,
    history_limit: usize,
}

impl Default for AnnotationManager {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl AnnotationManager {
    pub fn new(history_limit: usize) -> Self {
        Self {
            items: Vec::new(),
            history: History::new(Vec::new(), history_limit),
            history_limit,
        }
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: AnnotationId) -> Option<&Annotation> {
        self.items.iter().find(|a| a.id == id)
    }

    pub fn on_page(&self, page: usize) -> impl Iterator<Item = &Annotation> {
        self.items
            .iter()
            .filter(move |a| a.geometry.is_on_page(page))
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn create(
        &mut self,
        layouts: &dyn LayoutSource,
        kind: AnnotationKind,
        input: GeometryInput,
        style: impl Into<AnnotationStyle>,
    ) -> CoreResult<AnnotationId> {
        let annotation = prepare(layouts, kind, input, style.into())?;
        let id = annotation.id;
        self.execute(Command::Create(annotation));
        debug!(%id, %kind, "annotation created");
        Ok(id)
    }

    /// Creates one annotation per input, or none at all when any input is
    /// rejected.
    pub fn create_batch(
        &mut self,
        layouts: &dyn LayoutSource,
        kind: AnnotationKind,
        inputs: Vec<GeometryInput>,
        style: impl Into<AnnotationStyle>,
    ) -> CoreResult<Vec<AnnotationId>> {
        let style = style.into();
        let prepared = inputs
            .into_iter()
            .map(|input| prepare(layouts, kind, input, style))
            .collect::<CoreResult<Vec<Annotation>>>()?;
        let ids: Vec<AnnotationId> = prepared.iter().map(|a| a.id).collect();
        for annotation in prepared {
            self.execute(Command::Create(annotation));
        }
        debug!(?ids, %kind, "annotations created");
        Ok(ids)
    }

    pub fn delete(&mut self, id: AnnotationId) -> CoreResult<Annotation> {
        let index = self
            .items
            .iter()
            .position(|a| a.id == id)
            .ok_or(CoreError::NotFound(id))?;
        let annotation = self.items[index].clone();
        self.execute(Command::Delete {
            annotation: annotation.clone(),
            index,
        });
        Ok(annotation)
    }

    pub fn modify(&mut self, id: AnnotationId, change: Modification) -> CoreResult<()> {
        let before = self.get(id).cloned().ok_or(CoreError::NotFound(id))?;
        let mut after = before.clone();
        match change {
            Modification::Color(color) => after.color = color,
            Modification::Geometry(geometry) => {
                after.geometry = validate_geometry(before.kind, geometry)?;
            }
        }
        self.execute(Command::Modify { before, after });
        Ok(())
    }

    fn execute(&mut self, command: Command) {
        command.apply(&mut self.items);
        self.history.push(command);
    }

    pub fn undo(&mut self) -> bool {
        self.history.undo(&mut self.items)
    }

    pub fn redo(&mut self) -> bool {
        self.history.redo(&mut self.items)
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.history.is_dirty()
    }

    pub fn mark_saved(&mut self) {
        self.history.mark_saved();
    }

    /// Replaces the collection wholesale and starts a fresh history.
    pub fn replace_all(&mut self, items: Vec<Annotation>) {
        self.history = History::new(items.clone(), self.history_limit);
        self.items = items;
    }

    /// Topmost annotation under `point`; later annotations paint on top.
    pub fn annotation_at(&self, page: usize, point: Point, zoom: f32) -> Option<&Annotation> {
        self.items
            .iter()
            .rev()
            .find(|annotation| annotation.hit(page, point, zoom))
    }

    /// Writes every annotation as a native record and removes records this
    /// crate wrote earlier that no longer correspond to a live annotation.
    pub fn export_to_document(&mut self, backend: &dyn DocumentBackend) -> CoreResult<ExportReport> {
        let by_id: HashMap<AnnotationId, &Annotation> =
            self.items.iter().map(|a| (a.id, a)).collect();
        let page_count = backend.info().page_count;
        let mut report = ExportReport::default();

        for page in 0..page_count {
            let existing = backend.native_annotations(page).unwrap_or_else(|err| {
                warn!(page, error = %err, "failed to read native annotations");
                Vec::new()
            });
            let on_page: Vec<&Annotation> = self
                .items
                .iter()
                .filter(|a| a.geometry.is_on_page(page))
                .collect();

            if !on_page.is_empty() {
                match backend.page_size(page) {
                    Ok(size) => {
                        for annotation in on_page {
                            let Some(record) = to_native(annotation, page, size) else {
                                report.failures.push((
                                    annotation.id,
                                    CoreError::InvalidAnnotationGeometry(format!(
                                        "no native form for {} on page {page}",
                                        annotation.kind
                                    )),
                                ));
                                continue;
                            };
                            match backend.write_annotation(page, &record) {
                                Ok(()) => report.written += 1,
                                Err(err) => report.failures.push((annotation.id, err.into())),
                            }
                        }
                    }
                    Err(err) => {
                        for annotation in on_page {
                            report.failures.push((
                                annotation.id,
                                CoreError::Backend(anyhow!("page {page} size unavailable: {err:#}")),
                            ));
                        }
                    }
                }
            }

            for record in existing {
                let Some(id) = record.annotation_id() else {
                    continue;
                };
                let live = by_id
                    .get(&id)
                    .map_or(false, |a| a.geometry.is_on_page(page));
                if live {
                    continue;
                }
                let Some(name) = record.name.as_deref() else {
                    continue;
                };
                match backend.remove_annotation(page, name) {
                    Ok(true) => report.removed += 1,
                    Ok(false) => {}
                    Err(err) => warn!(page, name, error = %err, "failed to remove stale annotation"),
                }
            }
        }

        backend.commit()?;
        if report.is_complete() {
            self.history.mark_saved();
        }
        debug!(
            written = report.written,
            removed = report.removed,
            failed = report.failures.len(),
            "annotations exported"
        );
        Ok(report)
    }

    /// Replaces the collection with the records this crate previously wrote
    /// into the document. Unreadable pages are skipped and reported.
    pub fn import_from_document(&mut self, backend: &dyn DocumentBackend) -> CoreResult<ImportReport> {
        let page_count = backend.info().page_count;
        let mut report = ImportReport::default();
        let mut records = Vec::new();
        let mut sizes = HashMap::new();
        for page in 0..page_count {
            let natives = match backend.native_annotations(page) {
                Ok(natives) => natives,
                Err(err) => {
                    warn!(page, error = %err, "failed to read native annotations");
                    report.failures.push((page, err.into()));
                    continue;
                }
            };
            if !natives.iter().any(|r| r.annotation_id().is_some()) {
                continue;
            }
            match backend.page_size(page) {
                Ok(size) => {
                    sizes.insert(page, size);
                    records.extend(natives.into_iter().map(|record| (page, record)));
                }
                Err(err) => {
                    warn!(page, error = %err, "page size unavailable, annotations skipped");
                    report.failures.push((page, err.into()));
                }
            }
        }

        let items = from_native(&records, |page| sizes.get(&page).copied());
        report.imported = items.len();
        self.replace_all(items);
        debug!(
            count = report.imported,
            failed = report.failures.len(),
            "annotations imported"
        );
        Ok(report)
    }

    /// Ids of every annotation in the collection.
    pub fn ids(&self) -> HashSet<AnnotationId> {
        self.items.iter().map(|a| a.id).collect()
    }
}

fn prepare(
    layouts: &dyn LayoutSource,
    kind: AnnotationKind,
    input: GeometryInput,
    style: AnnotationStyle,
) -> CoreResult<Annotation> {
    let geometry = resolve_input(layouts, kind, input)?;
    let geometry = validate_geometry(kind, geometry)?;
    let stroke_width = if kind.is_drawing() {
        let width = style.stroke_width.unwrap_or(DEFAULT_STROKE_WIDTH);
        if !width.is_finite() || width <= 0.0 {
            return Err(CoreError::InvalidAnnotationGeometry(format!(
                "stroke width {width} must be positive"
            )));
        }
        Some(width)
    } else {
        None
    };

    Ok(Annotation {
        id: Uuid::new_v4(),
        kind,
        geometry,
        color: style.color,
        stroke_width,
        filled: style.filled && kind.supports_fill(),
        created_at: Utc::now(),
    })
}

fn resolve_input(
    layouts: &dyn LayoutSource,
    kind: AnnotationKind,
    input: GeometryInput,
) -> CoreResult<AnnotationGeometry> {
    match input {
        GeometryInput::Text(range) => {
            if !kind.is_text_markup() {
                return Err(CoreError::InvalidAnnotationGeometry(format!(
                    "{kind} needs page points, not a text range"
                )));
            }
            if range.is_empty() {
                return Err(CoreError::InvalidAnnotationGeometry(
                    "empty text range".to_string(),
                ));
            }
            let quads = range
                .pages()
                .filter_map(|page| {
                    let layout = layouts.layout(page)?;
                    let (start, end) = range.page_span(page, layout.len())?;
                    Some(PageQuads {
                        page,
                        quads: layout.quads_for(start, end),
                    })
                })
                .collect();
            Ok(AnnotationGeometry::TextMarkup {
                range: Some(range),
                quads,
            })
        }
        GeometryInput::Points { page, points } => {
            Ok(AnnotationGeometry::Drawing { page, points })
        }
    }
}
