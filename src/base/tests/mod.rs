mod tests_keys;
