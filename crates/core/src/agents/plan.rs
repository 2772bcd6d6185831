use crate::artifacts::{ArtifactKind, AUDIOBOOK_KINDS, EDITORIAL_KINDS, MARKETING_KINDS};
use crate::job::Pipeline;

/// Which family of model a stage runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelClass {
    Editorial,
    Creative,
}

/// Static configuration of one stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageSpec {
    pub temperature: f32,
    pub max_tokens: u32,
    pub model_class: ModelClass,
}

pub fn stage_spec(kind: &ArtifactKind) -> StageSpec {
    use ArtifactKind::*;

    let (temperature, max_tokens, model_class) = match kind {
        Developmental => (0.3, 8192, ModelClass::Editorial),
        LineEditing | CopyEditing => (0.3, 8192, ModelClass::Editorial),
        BookDescription | AuthorBio | BackMatter => (0.8, 2048, ModelClass::Creative),
        Keywords | Categories => (0.7, 1024, ModelClass::Creative),
        AudiobookNarration | AudiobookSamples => (0.8, 4096, ModelClass::Creative),
        AudiobookPronunciation | AudiobookTiming | AudiobookMetadata => {
            (0.7, 4096, ModelClass::Creative)
        }
        HumanEdit(_) => (0.0, 0, ModelClass::Editorial),
    };

    StageSpec {
        temperature,
        max_tokens,
        model_class,
    }
}

/// Artifacts a stage reads from earlier stages.
pub fn dependencies(kind: &ArtifactKind) -> Vec<ArtifactKind> {
    use ArtifactKind::*;

    match kind {
        Developmental | HumanEdit(_) => vec![],
        LineEditing => vec![Developmental],
        CopyEditing => vec![Developmental, LineEditing],
        _ => vec![Developmental],
    }
}

/// Stage batches for `pipeline`, optionally restricted to `only`. Stages in
/// one batch run concurrently; batches run in order. Empty batches are
/// dropped.
pub fn plan(pipeline: Pipeline, only: Option<&[ArtifactKind]>) -> Vec<Vec<ArtifactKind>> {
    let batches: Vec<Vec<ArtifactKind>> = match pipeline {
        Pipeline::Analysis => EDITORIAL_KINDS.iter().map(|k| vec![k.clone()]).collect(),
        Pipeline::Assets => vec![MARKETING_KINDS.to_vec(), AUDIOBOOK_KINDS.to_vec()],
        Pipeline::Audiobook => vec![AUDIOBOOK_KINDS.to_vec()],
    };

    batches
        .into_iter()
        .map(|batch| match only {
            Some(only) => batch.into_iter().filter(|k| only.contains(k)).collect(),
            None => batch,
        })
        .filter(|batch: &Vec<ArtifactKind>| !batch.is_empty())
        .collect()
}
