pub mod batch;
pub mod datamat;
pub mod plan;
pub mod study;

pub use batch::{
    confound_file_name, process_batch, process_subject, write_run_summary, BatchReport,
    RunReport, RunStatus, SubjectReport,
};
pub use datamat::{read_datamat, split_datamat, write_condition_files, Session};
pub use plan::{read_plan, stim_tuples, write_plan, StimTuple, WorkflowPlan};
pub use study::{load_study, read_study_config, Study, StudySpec};
