use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use inkshade_core::{
    project_dirs, Activation, Annotation, AnnotationId, AnnotationKind, AnnotationStore,
    AnnotationStyle, Clipboard, Color, CoreConfig, Document, FileAnnotationStore, GeometryInput,
    LinkTarget, Modification, Point, SearchMatch, SelectionRange,
};
use inkshade_render::PdfRenderFactory;
use serde::Serialize;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};
use url::Url;

#[derive(Debug, Parser)]
#[command(
    name = "inkshade",
    version,
    about = "Select, search and annotate PDF text from the command line"
)]
struct Args {
    /// Read configuration from this file instead of the user config
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Neither read nor write the annotation sidecar
    #[arg(long, global = true)]
    no_sidecar: bool,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the extracted text of a page, or of every page
    Text {
        file: PathBuf,
        /// Page to print (0-based)
        #[arg(short = 'p', long = "page")]
        page: Option<usize>,
    },
    /// Select text by dragging between two points on a page
    Select {
        file: PathBuf,
        #[arg(short = 'p', long = "page", default_value_t = 0)]
        page: usize,
        /// Where the drag starts, as `x,y` in page points
        #[arg(long, value_parser = parse_point)]
        from: Point,
        /// Where the drag ends; defaults to the start point
        #[arg(long, value_parser = parse_point)]
        to: Option<Point>,
        /// 1 selects characters, 2 words, 3 lines
        #[arg(long, default_value_t = 1)]
        clicks: u8,
        /// Put the selected text on the system clipboard
        #[arg(long)]
        copy: bool,
    },
    /// Find text across the document
    Search {
        file: PathBuf,
        query: String,
        #[arg(short = 'c', long)]
        case_sensitive: bool,
        #[arg(short = 'w', long)]
        whole_word: bool,
        /// Copy the text of the first match to the system clipboard
        #[arg(long)]
        copy: bool,
    },
    /// List link regions, or follow the link under a point
    Links {
        file: PathBuf,
        #[arg(short = 'p', long = "page")]
        page: Option<usize>,
        /// Activate the link at `x,y` on `--page`
        #[arg(long, value_parser = parse_point, requires = "page")]
        at: Option<Point>,
        /// Accept an external link instead of only reporting it
        #[arg(long)]
        confirm: bool,
    },
    /// Create an annotation
    Annotate(AnnotateArgs),
    /// Inspect and edit stored annotations
    Annotations {
        file: PathBuf,
        #[command(subcommand)]
        action: Option<AnnotationAction>,
    },
    /// Render a page with its annotations to a PNG file
    Render {
        file: PathBuf,
        #[arg(short = 'p', long = "page", default_value_t = 0)]
        page: usize,
        #[arg(short = 's', long = "scale", default_value_t = 1.0)]
        scale: f32,
        /// Also paint matches of this text
        #[arg(long)]
        find: Option<String>,
        #[arg(short = 'o', long = "output")]
        output: PathBuf,
    },
}

#[derive(Debug, clap::Args)]
struct AnnotateArgs {
    file: PathBuf,
    /// highlight, underline, freehand, rectangle, circle, arrow or line
    #[arg(value_parser = parse_kind)]
    kind: AnnotationKind,
    #[arg(short = 'p', long = "page", default_value_t = 0)]
    page: usize,
    /// Character range on the page, as `start..end`
    #[arg(long, value_parser = parse_range, conflicts_with = "find")]
    range: Option<CharRange>,
    /// Mark every match of this text
    #[arg(long)]
    find: Option<String>,
    /// Drawing point as `x,y`; repeat for more points
    #[arg(long = "point", value_parser = parse_point)]
    points: Vec<Point>,
    /// Color as `#rrggbb`
    #[arg(long, value_parser = parse_color)]
    color: Option<Color>,
    /// Stroke width in points
    #[arg(long)]
    stroke: Option<f32>,
    #[arg(long)]
    fill: bool,
    /// Also write the annotations into the PDF file
    #[arg(long)]
    export: bool,
}

#[derive(Debug, Subcommand)]
enum AnnotationAction {
    /// List annotations (the default)
    List,
    Delete {
        id: AnnotationId,
    },
    Recolor {
        id: AnnotationId,
        #[arg(value_parser = parse_color)]
        color: Color,
    },
    /// Write annotations into the PDF file
    Export,
    /// Replace stored annotations with the ones in the PDF file
    Import,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CharRange {
    start: usize,
    end: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs =
        project_dirs().ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs)?;

    let store: Option<Arc<dyn AnnotationStore>> = if args.no_sidecar {
        None
    } else {
        let sidecar_dir = project_dirs.data_local_dir().join("annotations");
        Some(Arc::new(FileAnnotationStore::new(sidecar_dir)?))
    };
    let opener = Opener {
        provider: PdfRenderFactory::new()?,
        config: load_config(args.config.as_deref())?,
        store,
    };

    match args.command {
        Command::Text { file, page } => {
            let mut document = opener.open(&file).await?;
            print_text(&mut document, page)
        }
        Command::Select {
            file,
            page,
            from,
            to,
            clicks,
            copy,
        } => {
            let mut document = opener.open(&file).await?;
            document.load_layout_now(page)?;
            document.pointer_down(page, from, clicks)?;
            document.pointer_move(page, to.unwrap_or(from))?;
            document.pointer_up();
            if copy {
                copy_to_clipboard(&document)?;
            }
            println!("{}", document.selected_text());
            Ok(())
        }
        Command::Search {
            file,
            query,
            case_sensitive,
            whole_word,
            copy,
        } => {
            let mut document = opener.open(&file).await?;
            run_search(&mut document, &query, case_sensitive, whole_word, copy, args.json)
        }
        Command::Links {
            file,
            page,
            at,
            confirm,
        } => {
            let mut document = opener.open(&file).await?;
            match (page, at) {
                (Some(page), Some(point)) => follow_link(&mut document, page, point, confirm),
                (page, _) => list_links(&mut document, page, args.json),
            }
        }
        Command::Annotate(annotate) => {
            let mut document = opener.open(&annotate.file).await?;
            run_annotate(&mut document, &annotate)
        }
        Command::Annotations { file, action } => {
            let mut document = opener.open(&file).await?;
            run_annotations(
                &mut document,
                action.unwrap_or(AnnotationAction::List),
                args.json,
            )
        }
        Command::Render {
            file,
            page,
            scale,
            find,
            output,
        } => {
            let mut document = opener.open(&file).await?;
            if let Some(text) = find {
                document.load_layout_now(page)?;
                let query = document.query(text);
                document.find(query);
            }
            render_png(&document, page, scale, &output)
        }
    }
}

struct Opener {
    provider: PdfRenderFactory,
    config: CoreConfig,
    store: Option<Arc<dyn AnnotationStore>>,
}

impl Opener {
    async fn open(&self, path: &Path) -> Result<Document> {
        Document::open_with(
            &self.provider,
            path.to_path_buf(),
            self.config.clone(),
            self.store.clone(),
        )
        .await
        .with_context(|| format!("failed to open {:?}", path))
    }
}

fn load_config(path: Option<&Path>) -> Result<CoreConfig> {
    match path {
        Some(path) => CoreConfig::load_from_path(path)?
            .ok_or_else(|| anyhow!("config file {:?} does not exist", path)),
        None => Ok(CoreConfig::load()?),
    }
}

fn print_text(document: &mut Document, page: Option<usize>) -> Result<()> {
    let pages: Vec<usize> = match page {
        Some(page) => vec![page],
        None => (0..document.page_count()).collect(),
    };
    let many = pages.len() > 1;
    for page in pages {
        if many {
            println!("--- page {} ---", page + 1);
        }
        match document.load_layout_now(page) {
            Ok(layout) => println!("{}", layout.text()),
            Err(inkshade_core::CoreError::LayoutUnavailable { .. }) if many => {
                println!("(no text layer)");
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

struct SystemClipboard(arboard::Clipboard);

impl SystemClipboard {
    fn new() -> Result<Self> {
        let clipboard = arboard::Clipboard::new().context("failed to access the clipboard")?;
        Ok(Self(clipboard))
    }
}

impl Clipboard for SystemClipboard {
    fn set_text(&mut self, text: &str) -> Result<()> {
        self.0.set_text(text.to_owned())?;
        Ok(())
    }
}

fn copy_to_clipboard(document: &Document) -> Result<()> {
    let mut clipboard = SystemClipboard::new()?;
    if !document.copy_selection(&mut clipboard)? {
        warn!("nothing selected, clipboard left unchanged");
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct MatchReport {
    page: usize,
    start: usize,
    end: usize,
    context: String,
}

fn run_search(
    document: &mut Document,
    text: &str,
    case_sensitive: bool,
    whole_word: bool,
    copy: bool,
    json: bool,
) -> Result<()> {
    let indexed = document.load_all_layouts();
    info!(indexed, pages = document.page_count(), "search index ready");

    let mut query = document.query(text);
    query.case_sensitive |= case_sensitive;
    query.whole_word |= whole_word;
    let matches: Vec<SearchMatch> = document.find(query).matches().to_vec();

    let reports: Vec<MatchReport> = matches
        .iter()
        .map(|found| MatchReport {
            page: found.page,
            start: found.start,
            end: found.end,
            context: match_context(document, found),
        })
        .collect();

    if copy && !matches.is_empty() {
        document.next_match()?;
        document.select_current_match()?;
        copy_to_clipboard(document)?;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else if reports.is_empty() {
        println!("no matches for {:?}", text);
    } else {
        for report in &reports {
            println!("page {:>4}  {}", report.page + 1, report.context);
        }
        println!("{} match(es)", reports.len());
    }
    Ok(())
}

const CONTEXT_CHARS: usize = 24;

/// The match with some surrounding text, on one line.
fn match_context(document: &Document, found: &SearchMatch) -> String {
    let Some(stream) = document.search().index().page(found.page) else {
        return String::new();
    };
    let text: Vec<char> = stream.text().chars().collect();
    let from = found.start.saturating_sub(CONTEXT_CHARS);
    let to = (found.end + CONTEXT_CHARS).min(text.len());
    let slice = |a: usize, b: usize| -> String {
        text[a.min(text.len())..b.min(text.len())]
            .iter()
            .map(|ch| if ch.is_control() { ' ' } else { *ch })
            .collect()
    };
    format!(
        "{}[{}]{}",
        slice(from, found.start),
        slice(found.start, found.end),
        slice(found.end, to)
    )
}

#[derive(Debug, Serialize)]
struct LinkReport {
    page: usize,
    left: f32,
    top: f32,
    right: f32,
    bottom: f32,
    target: LinkTarget,
}

fn list_links(document: &mut Document, page: Option<usize>, json: bool) -> Result<()> {
    let pages: Vec<usize> = match page {
        Some(page) => vec![page],
        None => (0..document.page_count()).collect(),
    };
    let mut reports = Vec::new();
    for page in pages {
        for region in document.links(page)?.regions() {
            let bounds = region.quad.bounds();
            reports.push(LinkReport {
                page,
                left: bounds.left,
                top: bounds.top,
                right: bounds.right,
                bottom: bounds.bottom,
                target: region.target.clone(),
            });
        }
    }
    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }
    for report in &reports {
        println!(
            "page {:>4}  ({:.1}, {:.1})-({:.1}, {:.1})  {}",
            report.page + 1,
            report.left,
            report.top,
            report.right,
            report.bottom,
            truncate_with_ellipsis(report.target.describe(), 72)
        );
    }
    Ok(())
}

fn follow_link(document: &mut Document, page: usize, point: Point, confirm: bool) -> Result<()> {
    match document.activate_link(page, point)? {
        None => println!("no link at ({}, {})", point.x, point.y),
        Some(Activation::Navigate { page, point }) => match point {
            Some(point) => println!("go to page {} at ({}, {})", page + 1, point.x, point.y),
            None => println!("go to page {}", page + 1),
        },
        Some(Activation::PendingConfirmation(pending)) if confirm => {
            let url: Url = document.confirm_link(pending)?;
            println!("{url}");
        }
        Some(Activation::PendingConfirmation(pending)) => {
            println!("external link {} (pass --confirm to accept)", pending.url());
        }
    }
    Ok(())
}

fn run_annotate(document: &mut Document, args: &AnnotateArgs) -> Result<()> {
    let mut style = match args.color {
        Some(color) => AnnotationStyle {
            color,
            ..document.default_style(args.kind)
        },
        None => document.default_style(args.kind),
    };
    if let Some(width) = args.stroke {
        style = style.with_stroke(width);
    }
    style = style.filled(args.fill);

    let mut created = Vec::new();
    if args.kind.is_text_markup() {
        for range in markup_ranges(document, args)? {
            created.push(document.create_annotation(
                args.kind,
                GeometryInput::Text(range),
                style,
            )?);
        }
        if created.is_empty() {
            bail!("nothing to {}", args.kind.as_str());
        }
    } else {
        if args.points.is_empty() {
            bail!("{} needs at least one --point", args.kind.as_str());
        }
        created.push(document.create_annotation(
            args.kind,
            GeometryInput::Points {
                page: args.page,
                points: args.points.clone(),
            },
            style,
        )?);
    }
    document.save_sidecar()?;

    for id in &created {
        println!("{id}");
    }
    if args.export {
        export(document)?;
    }
    Ok(())
}

fn markup_ranges(document: &mut Document, args: &AnnotateArgs) -> Result<Vec<SelectionRange>> {
    if let Some(range) = args.range {
        document.load_layout_now(args.page)?;
        return Ok(vec![SelectionRange::on_page(args.page, range.start, range.end)]);
    }
    let Some(text) = &args.find else {
        bail!("{} needs --range or --find", args.kind.as_str());
    };
    document.load_all_layouts();
    let query = document.query(text.as_str());
    let matches: Vec<SearchMatch> = document.find(query).matches().to_vec();
    Ok(matches
        .iter()
        .filter_map(|found| {
            let (start, end) = document.search().index().layout_range(found)?;
            Some(SelectionRange::on_page(found.page, start, end))
        })
        .collect())
}

#[derive(Debug, Serialize)]
struct AnnotationReport<'a> {
    pages: Vec<usize>,
    #[serde(flatten)]
    annotation: &'a Annotation,
}

fn run_annotations(document: &mut Document, action: AnnotationAction, json: bool) -> Result<()> {
    match action {
        AnnotationAction::List => {
            let annotations = document.annotations().annotations();
            if json {
                let reports: Vec<AnnotationReport<'_>> = annotations
                    .iter()
                    .map(|annotation| AnnotationReport {
                        pages: annotation.geometry.pages(),
                        annotation,
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&reports)?);
            } else {
                for annotation in annotations {
                    println!("{}", describe_annotation(annotation));
                }
            }
        }
        AnnotationAction::Delete { id } => {
            document.delete_annotation(id)?;
            document.save_sidecar()?;
        }
        AnnotationAction::Recolor { id, color } => {
            document.modify_annotation(id, Modification::Color(color))?;
            document.save_sidecar()?;
        }
        AnnotationAction::Export => export(document)?,
        AnnotationAction::Import => {
            let report = document.import_annotations()?;
            document.save_sidecar()?;
            println!("imported {} annotation(s)", report.imported);
            for (page, err) in &report.failures {
                warn!(page = page + 1, error = %err, "page annotations were not imported");
            }
        }
    }
    Ok(())
}

fn describe_annotation(annotation: &Annotation) -> String {
    let pages: Vec<String> = annotation
        .geometry
        .pages()
        .iter()
        .map(|page| (page + 1).to_string())
        .collect();
    format!(
        "{}  {:<9}  {}  page {}",
        annotation.id,
        annotation.kind.as_str(),
        annotation.color.to_hex(),
        pages.join(",")
    )
}

fn export(document: &mut Document) -> Result<()> {
    let report = document.export_annotations()?;
    println!(
        "wrote {} annotation(s), removed {}",
        report.written, report.removed
    );
    for (id, err) in &report.failures {
        warn!(%id, error = %err, "annotation was not exported");
    }
    if !report.is_complete() {
        bail!("{} annotation(s) could not be exported", report.failures.len());
    }
    Ok(())
}

fn render_png(document: &Document, page: usize, scale: f32, output: &Path) -> Result<()> {
    let rendered = document.render_with_overlay(page, scale)?;
    let (width, height) = (rendered.width, rendered.height);
    let image = image::RgbaImage::from_raw(width, height, rendered.pixels)
        .ok_or_else(|| anyhow!("renderer returned a malformed {}x{} bitmap", width, height))?;
    image
        .save(output)
        .with_context(|| format!("failed to write {:?}", output))?;
    info!(page, width, height, output = %output.display(), "page rendered");
    Ok(())
}

fn init_logging(project_dirs: &ProjectDirs) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "inkshade.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);
    // stdout carries command output
    let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}

fn truncate_with_ellipsis(mut text: String, width: usize) -> String {
    if text.chars().count() > width {
        if width <= 3 {
            text = text.chars().take(width).collect();
        } else {
            let mut truncated = text.chars().take(width - 3).collect::<String>();
            truncated.push_str("...");
            text = truncated;
        }
    }
    text
}

fn parse_point(value: &str) -> Result<Point, String> {
    let (x, y) = value
        .split_once(',')
        .ok_or_else(|| format!("expected `x,y`, got `{value}`"))?;
    let coordinate = |part: &str| {
        part.trim()
            .parse::<f32>()
            .map_err(|err| format!("invalid coordinate `{}`: {err}", part.trim()))
    };
    let point = Point::new(coordinate(x)?, coordinate(y)?);
    if !point.is_finite() {
        return Err(format!("point `{value}` is not finite"));
    }
    Ok(point)
}

fn parse_range(value: &str) -> Result<CharRange, String> {
    let (start, end) = value
        .split_once("..")
        .ok_or_else(|| format!("expected `start..end`, got `{value}`"))?;
    let offset = |part: &str| {
        part.trim()
            .parse::<usize>()
            .map_err(|err| format!("invalid offset `{}`: {err}", part.trim()))
    };
    let range = CharRange {
        start: offset(start)?,
        end: offset(end)?,
    };
    if range.start >= range.end {
        return Err(format!("range `{value}` is empty"));
    }
    Ok(range)
}

fn parse_color(value: &str) -> Result<Color, String> {
    Color::from_hex(value).ok_or_else(|| format!("expected `#rrggbb`, got `{value}`"))
}

fn parse_kind(value: &str) -> Result<AnnotationKind, String> {
    value
        .to_ascii_lowercase()
        .parse::<AnnotationKind>()
        .map_err(|err| err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn points_parse_with_spaces() {
        assert_eq!(parse_point("12.5, 40").unwrap(), Point::new(12.5, 40.0));
        assert!(parse_point("12").is_err());
        assert!(parse_point("a,b").is_err());
        assert!(parse_point("inf,1").is_err());
    }

    #[test]
    fn ranges_must_be_non_empty() {
        assert_eq!(
            parse_range("3..9").unwrap(),
            CharRange { start: 3, end: 9 }
        );
        assert!(parse_range("9..3").is_err());
        assert!(parse_range("4..4").is_err());
        assert!(parse_range("4-9").is_err());
    }

    #[test]
    fn colors_and_kinds_parse() {
        assert_eq!(parse_color("#ff8000").unwrap(), Color::rgb(255, 128, 0));
        assert!(parse_color("orange").is_err());
        assert_eq!(parse_kind("Highlight").unwrap(), AnnotationKind::Highlight);
        assert!(parse_kind("scribble").is_err());
    }

    #[test]
    fn long_link_labels_are_shortened() {
        assert_eq!(truncate_with_ellipsis("abcdef".to_string(), 5), "ab...");
        assert_eq!(truncate_with_ellipsis("abc".to_string(), 5), "abc");
    }

    #[test]
    fn annotate_requires_a_kind() {
        let args = Args::try_parse_from(["inkshade", "annotate", "doc.pdf"]);
        assert!(args.is_err());

        let args = Args::try_parse_from([
            "inkshade", "annotate", "doc.pdf", "arrow", "--point", "1,2", "--point", "30,40",
        ])
        .unwrap();
        let Command::Annotate(annotate) = args.command else {
            panic!("expected annotate");
        };
        assert_eq!(annotate.kind, AnnotationKind::Arrow);
        assert_eq!(annotate.points.len(), 2);
    }

    #[test]
    fn links_at_needs_a_page() {
        assert!(Args::try_parse_from(["inkshade", "links", "doc.pdf", "--at", "1,1"]).is_err());
        assert!(
            Args::try_parse_from(["inkshade", "links", "doc.pdf", "--page", "0", "--at", "1,1"])
                .is_ok()
        );
    }
}
