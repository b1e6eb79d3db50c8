mod tests_reps;
