pub mod problem;
pub mod submission;
pub mod test_case_run;
