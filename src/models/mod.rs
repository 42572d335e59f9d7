pub mod artifact;
pub mod batch;
pub mod loaders;
pub mod location;
pub mod question;
pub mod question_run;
pub mod usage;

pub use artifact::ArtifactKind;
pub use batch::{Batch, BatchScope, BatchStatus, ProgressDelta};
pub use loaders::{load_manifest, RunManifest};
pub use location::{Location, ModelLocationPair};
pub use question::Question;
pub use question_run::{QuestionRun, RunKey};
pub use usage::UsageLedgerEntry;
