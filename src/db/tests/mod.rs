pub mod helpers;

mod tests_basic;
mod tests_column_families;
mod tests_merge_operator;
mod tests_recovery;
mod tests_stress;
