mod tests_limits;
mod tests_primitives;
