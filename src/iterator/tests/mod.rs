mod tests_db_iterator;
