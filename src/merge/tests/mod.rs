mod tests_operators;
