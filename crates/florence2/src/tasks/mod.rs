//! Florence-2 tasks and query construction
//!
//! [`TASK_TABLE`] is the single description of every task: its machine alias,
//! human prompt template, argument requirements and the shape of its output.
//! Query construction ([`create_query`] and friends) and output parsing
//! ([`crate::postprocess::parse_output`]) both read it.

pub mod coordinates;

pub use coordinates::{
    bin_to_pixel, loc_token, normalized_to_bin, parse_loc_tokens, token_pair_to_point,
    tokens_to_coordinates, NormalizedRect, PointF, RectF, LOC_BINS,
};

use crate::error::{Florence2Error, Result};

/// Placeholder substituted in prompt templates
const INPUT_PLACEHOLDER: &str = "{input}";

/// Florence-2 task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskType {
    Caption,
    DetailedCaption,
    MoreDetailedCaption,
    Ocr,
    OcrWithRegion,
    ObjectDetection,
    DenseRegionCaption,
    RegionProposal,
    CaptionToPhraseGrounding,
    ReferringExpressionSegmentation,
    RegionToSegmentation,
    OpenVocabularyDetection,
    RegionToCategory,
    RegionToDescription,
    RegionToOcr,
}

/// Which parts of [`Florence2Result`](crate::postprocess::Florence2Result) a task fills
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ReturnFlags {
    pub text: bool,
    pub labels: bool,
    pub bounding_boxes: bool,
    pub polygons: bool,
}

impl ReturnFlags {
    const TEXT: Self = Self::new(true, false, false, false);
    const LABELED_BOXES: Self = Self::new(false, true, true, false);
    const LABELED_QUADS: Self = Self::new(false, true, true, true);
    const LABELED_POLYGONS: Self = Self::new(false, true, false, true);
    const POLYGONS: Self = Self::new(false, false, false, true);

    #[inline]
    #[must_use = "returns new return flags"]
    pub const fn new(text: bool, labels: bool, bounding_boxes: bool, polygons: bool) -> Self {
        Self {
            text,
            labels,
            bounding_boxes,
            polygons,
        }
    }

    /// True when no output part is requested
    #[inline]
    #[must_use = "returns whether no flag is set"]
    pub const fn is_empty(&self) -> bool {
        !(self.text || self.labels || self.bounding_boxes || self.polygons)
    }
}

/// One row of the task table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskConfig {
    pub task: TaskType,
    /// Machine alias, e.g. `<OD>`
    pub alias: &'static str,
    /// Human prompt sent to the model; may contain `{input}`
    pub prompt: &'static str,
    pub requires_region: bool,
    pub requires_sub_prompt: bool,
    pub returns: ReturnFlags,
}

const fn row(
    task: TaskType,
    alias: &'static str,
    prompt: &'static str,
    requires_region: bool,
    requires_sub_prompt: bool,
    returns: ReturnFlags,
) -> TaskConfig {
    TaskConfig {
        task,
        alias,
        prompt,
        requires_region,
        requires_sub_prompt,
        returns,
    }
}

/// Every task, indexed by its [`TaskType`] discriminant
pub static TASK_TABLE: [TaskConfig; 15] = [
    row(TaskType::Caption, "<CAPTION>", "What does the image describe?", false, false, ReturnFlags::TEXT),
    row(TaskType::DetailedCaption, "<DETAILED_CAPTION>", "Describe in detail what is shown in the image.", false, false, ReturnFlags::TEXT),
    row(TaskType::MoreDetailedCaption, "<MORE_DETAILED_CAPTION>", "Describe with a paragraph what is shown in the image.", false, false, ReturnFlags::TEXT),
    row(TaskType::Ocr, "<OCR>", "What is the text in the image?", false, false, ReturnFlags::TEXT),
    row(TaskType::OcrWithRegion, "<OCR_WITH_REGION>", "What is the text in the image, with regions?", false, false, ReturnFlags::LABELED_QUADS),
    row(TaskType::ObjectDetection, "<OD>", "Locate the objects with category name in the image.", false, false, ReturnFlags::LABELED_BOXES),
    row(TaskType::DenseRegionCaption, "<DENSE_REGION_CAPTION>", "Locate the objects in the image, with their descriptions.", false, false, ReturnFlags::LABELED_BOXES),
    row(TaskType::RegionProposal, "<REGION_PROPOSAL>", "Locate the region proposals in the image.", false, false, ReturnFlags::LABELED_BOXES),
    row(TaskType::CaptionToPhraseGrounding, "<CAPTION_TO_PHRASE_GROUNDING>", "Locate the phrases in the caption: {input}", false, true, ReturnFlags::LABELED_BOXES),
    row(TaskType::ReferringExpressionSegmentation, "<REFERRING_EXPRESSION_SEGMENTATION>", "Locate {input} in the image with mask", false, true, ReturnFlags::POLYGONS),
    row(TaskType::RegionToSegmentation, "<REGION_TO_SEGMENTATION>", "What is the polygon mask of region {input}", true, false, ReturnFlags::POLYGONS),
    row(TaskType::OpenVocabularyDetection, "<OPEN_VOCABULARY_DETECTION>", "Locate {input} in the image.", false, true, ReturnFlags::LABELED_POLYGONS),
    row(TaskType::RegionToCategory, "<REGION_TO_CATEGORY>", "What is the region {input}?", true, false, ReturnFlags::TEXT),
    row(TaskType::RegionToDescription, "<REGION_TO_DESCRIPTION>", "What does the region {input} describe?", true, false, ReturnFlags::TEXT),
    row(TaskType::RegionToOcr, "<REGION_TO_OCR>", "What text is in the region {input}?", true, false, ReturnFlags::TEXT),
];

impl TaskType {
    /// All tasks in table order
    pub const ALL: [Self; 15] = [
        Self::Caption,
        Self::DetailedCaption,
        Self::MoreDetailedCaption,
        Self::Ocr,
        Self::OcrWithRegion,
        Self::ObjectDetection,
        Self::DenseRegionCaption,
        Self::RegionProposal,
        Self::CaptionToPhraseGrounding,
        Self::ReferringExpressionSegmentation,
        Self::RegionToSegmentation,
        Self::OpenVocabularyDetection,
        Self::RegionToCategory,
        Self::RegionToDescription,
        Self::RegionToOcr,
    ];

    /// This task's row of [`TASK_TABLE`]
    #[inline]
    #[must_use = "returns the task configuration"]
    pub fn config(self) -> &'static TaskConfig {
        &TASK_TABLE[self as usize]
    }

    #[inline]
    #[must_use = "returns the machine alias"]
    pub fn alias(self) -> &'static str {
        self.config().alias
    }
}

impl std::fmt::Display for TaskType {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.alias())
    }
}

impl std::str::FromStr for TaskType {
    type Err = Florence2Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        TASK_TABLE
            .iter()
            .find(|row| row.alias.eq_ignore_ascii_case(trimmed))
            .map(|row| row.task)
            .ok_or_else(|| Florence2Error::argument(format!("Unknown task alias '{s}'")))
    }
}

/// A validated (task, prompt) pair
///
/// Built only through [`create_query`], [`create_query_with_region`] and
/// [`create_query_with_text`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Florence2Query {
    task: TaskType,
    prompt: String,
}

impl Florence2Query {
    pub(crate) fn from_parts(task: TaskType, prompt: impl Into<String>) -> Self {
        Self {
            task,
            prompt: prompt.into(),
        }
    }

    #[inline]
    #[must_use = "returns the task type"]
    pub const fn task(&self) -> TaskType {
        self.task
    }

    /// Prompt text sent to the model
    #[inline]
    #[must_use = "returns the prompt"]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }
}

/// Query for a task that takes no argument
///
/// # Errors
///
/// [`Florence2Error::ArgumentError`] if the task needs a region or a sub-prompt.
pub fn create_query(task: TaskType) -> Result<Florence2Query> {
    let config = task.config();
    if config.requires_region {
        return Err(Florence2Error::argument(format!(
            "Task {task} requires a region, use create_query_with_region"
        )));
    }
    if config.requires_sub_prompt {
        return Err(Florence2Error::argument(format!(
            "Task {task} requires a text input, use create_query_with_text"
        )));
    }
    Ok(Florence2Query::from_parts(task, config.prompt))
}

/// Query for a region task; `region` is given as fractions of the image size
///
/// # Errors
///
/// [`Florence2Error::ArgumentError`] if the task does not take a region.
pub fn create_query_with_region(task: TaskType, region: NormalizedRect) -> Result<Florence2Query> {
    let config = task.config();
    if !config.requires_region {
        return Err(Florence2Error::argument(format!(
            "Task {task} does not take a region"
        )));
    }
    let prompt = config
        .prompt
        .replace(INPUT_PLACEHOLDER, &region.to_loc_tokens());
    Ok(Florence2Query::from_parts(task, prompt))
}

/// Query for a task that takes a text input (grounding, referring segmentation,
/// open-vocabulary detection)
///
/// # Errors
///
/// [`Florence2Error::ArgumentError`] if the task does not take text or `text` is
/// empty or whitespace-only.
pub fn create_query_with_text(task: TaskType, text: &str) -> Result<Florence2Query> {
    let config = task.config();
    if !config.requires_sub_prompt {
        return Err(Florence2Error::argument(format!(
            "Task {task} does not take a text input"
        )));
    }
    if text.trim().is_empty() {
        return Err(Florence2Error::argument(format!(
            "Task {task} requires a non-empty text input"
        )));
    }
    let prompt = config.prompt.replace(INPUT_PLACEHOLDER, text);
    Ok(Florence2Query::from_parts(task, prompt))
}
