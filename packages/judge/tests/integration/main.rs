mod failures;
mod harness;
mod judging;
