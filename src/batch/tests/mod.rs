mod tests_format;
mod tests_iterate;
