//! Trunk vs story mode, detected once per invocation.

use crate::error::{StoryError, StoryResult};
use crate::vcs::{Repo, Vcs};

/// Whether the metarepo is on trunk or on a story branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Trunk,
    Story { branch: String },
}

impl Mode {
    /// Story mode iff the metarepo's current branch is not `trunk`.
    pub fn detect(vcs: &dyn Vcs, trunk: &str) -> StoryResult<Self> {
        let branch = vcs.current_branch(Repo::Metarepo)?;
        if branch == trunk {
            Ok(Mode::Trunk)
        } else {
            Ok(Mode::Story { branch })
        }
    }

    pub fn is_story(&self) -> bool {
        matches!(self, Mode::Story { .. })
    }

    pub fn require_trunk(&self) -> StoryResult<()> {
        match self {
            Mode::Trunk => Ok(()),
            Mode::Story { .. } => Err(StoryError::AlreadyOnStory),
        }
    }

    /// The story branch name, or [`StoryError::NotOnStory`].
    pub fn require_story(&self) -> StoryResult<&str> {
        match self {
            Mode::Story { branch } => Ok(branch),
            Mode::Trunk => Err(StoryError::NotOnStory),
        }
    }
}
