//! Reads and writes standard annotation dictionaries in a PDF file with
//! `lopdf`. Records are matched by their `/NM` entry.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use inkshade_core::annotation::{LineEnding, NativeAnnotation, NativeSubtype};
use lopdf::{Dictionary, Document, Object, ObjectId, StringFormat};
use parking_lot::Mutex;
use tracing::{debug, instrument};

/// Print flag, so annotations show up on paper too.
const ANNOTATION_FLAGS: i64 = 4;

pub struct PdfAnnotationFile {
    path: PathBuf,
    document: Mutex<Document>,
}

impl PdfAnnotationFile {
    pub fn open(path: &Path) -> Result<Self> {
        let document =
            Document::load(path).map_err(|err| anyhow!("failed to parse {:?}: {}", path, err))?;
        Ok(Self::from_document(path.to_path_buf(), document))
    }

    pub fn from_document(path: PathBuf, document: Document) -> Self {
        Self {
            path,
            document: Mutex::new(document),
        }
    }

    pub fn read(&self, page_index: usize) -> Result<Vec<NativeAnnotation>> {
        let document = self.document.lock();
        let page_id = page_id(&document, page_index)?;
        Ok(annotation_objects(&document, page_id)
            .into_iter()
            .filter_map(|object| {
                let dict = resolve(&document, object).as_dict().ok()?;
                decode(&document, dict)
            })
            .collect())
    }

    /// Inserts `record`, replacing an annotation with the same `/NM`.
    #[instrument(skip(self, record), fields(name = ?record.name))]
    pub fn write(&self, page_index: usize, record: &NativeAnnotation) -> Result<()> {
        let mut document = self.document.lock();
        let page_id = page_id(&document, page_index)?;
        let dict = encode(record, page_id);

        let existing = record
            .name
            .as_deref()
            .and_then(|name| find_named(&document, page_id, name));
        match existing {
            Some(id) => {
                document.objects.insert(id, Object::Dictionary(dict));
                debug!(page = page_index, "annotation replaced");
            }
            None => {
                let id = document.add_object(dict);
                push_annotation(&mut document, page_id, id)?;
                debug!(page = page_index, "annotation added");
            }
        }
        Ok(())
    }

    /// Removes the annotation called `name`. Returns whether it existed.
    pub fn remove(&self, page_index: usize, name: &str) -> Result<bool> {
        let mut document = self.document.lock();
        let page_id = page_id(&document, page_index)?;
        let Some(id) = find_named(&document, page_id, name) else {
            return Ok(false);
        };
        let annots = annots_array_mut(&mut document, page_id)?;
        annots.retain(|object| object.as_reference().map_or(true, |r| r != id));
        document.objects.remove(&id);
        Ok(true)
    }

    /// Writes the document back to its path through a temporary file.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn save(&self) -> Result<()> {
        let tmp = self.path.with_extension("pdf.tmp");
        let mut buffer = Vec::new();
        self.save_to(&mut buffer)?;
        let mut file = fs::File::create(&tmp)
            .with_context(|| format!("failed to open temp file {:?}", tmp))?;
        file.write_all(&buffer)?;
        file.flush()?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to move {:?} into place", self.path))?;
        Ok(())
    }

    pub fn save_to<W: Write>(&self, target: &mut W) -> Result<()> {
        self.document
            .lock()
            .save_to(target)
            .map_err(|err| anyhow!("failed to serialize {:?}: {}", self.path, err))
    }
}

fn page_id(document: &Document, page_index: usize) -> Result<ObjectId> {
    let number = u32::try_from(page_index + 1)
        .map_err(|_| anyhow!("page {} is out of supported range", page_index))?;
    document
        .get_pages()
        .get(&number)
        .copied()
        .with_context(|| format!("page {} out of range", page_index))
}

fn resolve<'a>(document: &'a Document, object: &'a Object) -> &'a Object {
    match object {
        Object::Reference(id) => document.get_object(*id).unwrap_or(object),
        _ => object,
    }
}

fn number(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(value) => Some(*value as f32),
        Object::Real(value) => Some(*value),
        _ => None,
    }
}

fn numbers(document: &Document, object: &Object) -> Option<Vec<f32>> {
    resolve(document, object)
        .as_array()
        .ok()?
        .iter()
        .map(|item| number(resolve(document, item)))
        .collect()
}

fn reals(values: &[f32]) -> Object {
    Object::Array(values.iter().map(|v| Object::Real(*v)).collect())
}

fn text(object: &Object) -> Option<String> {
    match object {
        Object::String(bytes, _) => Some(String::from_utf8_lossy(bytes).into_owned()),
        _ => None,
    }
}

fn literal(value: &str) -> Object {
    Object::String(value.as_bytes().to_vec(), StringFormat::Literal)
}

fn name(object: &Object) -> Option<String> {
    match object {
        Object::Name(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        _ => None,
    }
}

fn annotation_objects(document: &Document, page_id: ObjectId) -> Vec<&Object> {
    let Ok(page) = document.get_dictionary(page_id) else {
        return Vec::new();
    };
    match page.get(b"Annots").map(|annots| resolve(document, annots)) {
        Ok(Object::Array(items)) => items.iter().collect(),
        _ => Vec::new(),
    }
}

fn find_named(document: &Document, page_id: ObjectId, wanted: &str) -> Option<ObjectId> {
    annotation_objects(document, page_id)
        .into_iter()
        .filter_map(|object| object.as_reference().ok())
        .find(|id| {
            document
                .get_dictionary(*id)
                .ok()
                .and_then(|dict| dict.get(b"NM").ok())
                .and_then(text)
                .map_or(false, |nm| nm == wanted)
        })
}

/// The page's `/Annots` array, created if missing. Follows an indirect array.
fn annots_array_mut(document: &mut Document, page_id: ObjectId) -> Result<&mut Vec<Object>> {
    let indirect = document
        .get_dictionary(page_id)
        .ok()
        .and_then(|page| page.get(b"Annots").ok())
        .and_then(|annots| annots.as_reference().ok());

    if let Some(array_id) = indirect {
        return match document.get_object_mut(array_id) {
            Ok(Object::Array(items)) => Ok(items),
            _ => Err(anyhow!("/Annots of page object {:?} is not an array", page_id)),
        };
    }

    let page = document
        .get_object_mut(page_id)
        .map_err(|err| anyhow!("page object {:?} unavailable: {}", page_id, err))?
        .as_dict_mut()
        .map_err(|err| anyhow!("page object {:?} is not a dictionary: {}", page_id, err))?;
    if !matches!(page.get(b"Annots"), Ok(Object::Array(_))) {
        page.set("Annots", Object::Array(Vec::new()));
    }
    match page.get_mut(b"Annots") {
        Ok(Object::Array(items)) => Ok(items),
        _ => Err(anyhow!("/Annots of page object {:?} is not an array", page_id)),
    }
}

fn push_annotation(document: &mut Document, page_id: ObjectId, id: ObjectId) -> Result<()> {
    annots_array_mut(document, page_id)?.push(Object::Reference(id));
    Ok(())
}

fn encode(record: &NativeAnnotation, page_id: ObjectId) -> Dictionary {
    let mut dict = Dictionary::new();
    dict.set("Type", Object::Name(b"Annot".to_vec()));
    dict.set(
        "Subtype",
        Object::Name(record.subtype.as_name().as_bytes().to_vec()),
    );
    dict.set("Rect", reals(&record.rect));
    dict.set("P", Object::Reference(page_id));
    dict.set("F", Object::Integer(ANNOTATION_FLAGS));
    if let Some(name) = &record.name {
        dict.set("NM", literal(name));
    }
    if let Some(color) = record.color {
        dict.set("C", reals(&color));
    }
    if let Some(color) = record.interior_color {
        dict.set("IC", reals(&color));
    }
    if let Some(width) = record.border_width {
        let mut border = Dictionary::new();
        border.set("W", Object::Real(width));
        border.set("S", Object::Name(b"S".to_vec()));
        dict.set("BS", Object::Dictionary(border));
    }
    if let Some(date) = &record.creation_date {
        dict.set("CreationDate", literal(date));
        dict.set("M", literal(date));
    }
    if !record.quad_points.is_empty() {
        dict.set("QuadPoints", reals(&record.quad_points));
    }
    if !record.ink_list.is_empty() {
        dict.set(
            "InkList",
            Object::Array(record.ink_list.iter().map(|path| reals(path)).collect()),
        );
    }
    if let Some(line) = record.line {
        dict.set("L", reals(&line));
        dict.set(
            "LE",
            Object::Array(
                record
                    .line_endings
                    .iter()
                    .map(|ending| Object::Name(ending.as_name().as_bytes().to_vec()))
                    .collect(),
            ),
        );
    }
    dict
}

fn triple(document: &Document, object: &Object) -> Option<[f32; 3]> {
    match numbers(document, object)?.as_slice() {
        [r, g, b] => Some([*r, *g, *b]),
        _ => None,
    }
}

fn decode(document: &Document, dict: &Dictionary) -> Option<NativeAnnotation> {
    let subtype = dict
        .get(b"Subtype")
        .ok()
        .and_then(name)
        .and_then(|subtype| NativeSubtype::from_name(&subtype))?;
    let get = |key: &[u8]| dict.get(key).ok().map(|object| resolve(document, object));

    let mut record = NativeAnnotation::new(subtype);
    record.name = get(b"NM").and_then(text);
    if let Some([llx, lly, urx, ury]) = get(b"Rect")
        .and_then(|object| numbers(document, object))
        .as_deref()
        .and_then(|values| <[f32; 4]>::try_from(values).ok())
    {
        record.rect = [llx.min(urx), lly.min(ury), llx.max(urx), lly.max(ury)];
    }
    record.quad_points = get(b"QuadPoints")
        .and_then(|object| numbers(document, object))
        .unwrap_or_default();
    record.ink_list = get(b"InkList")
        .and_then(|object| object.as_array().ok())
        .map(|paths| {
            paths
                .iter()
                .filter_map(|path| numbers(document, path))
                .collect()
        })
        .unwrap_or_default();
    record.line = get(b"L")
        .and_then(|object| numbers(document, object))
        .and_then(|values| <[f32; 4]>::try_from(values.as_slice()).ok());
    if let Some(endings) = get(b"LE").and_then(|object| object.as_array().ok()) {
        for (slot, ending) in record.line_endings.iter_mut().zip(endings) {
            *slot = name(resolve(document, ending))
                .map_or(LineEnding::None, |n| LineEnding::from_name(&n));
        }
    }
    record.color = get(b"C").and_then(|object| triple(document, object));
    record.interior_color = get(b"IC").and_then(|object| triple(document, object));
    record.border_width = get(b"BS")
        .and_then(|object| object.as_dict().ok())
        .and_then(|border| border.get(b"W").ok())
        .and_then(|width| number(resolve(document, width)))
        .or_else(|| {
            // Legacy `/Border [h v w]`
            get(b"Border")
                .and_then(|object| numbers(document, object))
                .and_then(|values| values.get(2).copied())
        });
    record.creation_date = get(b"CreationDate").and_then(text);
    Some(record)
}
