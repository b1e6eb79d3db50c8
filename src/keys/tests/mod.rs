mod tests_comparators;
mod tests_packing;
