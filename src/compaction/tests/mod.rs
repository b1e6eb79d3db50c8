mod tests_level_picker;
