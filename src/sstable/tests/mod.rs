mod helpers;

mod tests_basic;
mod tests_rangedel;


// Priority 3 — lifecycle and reuse
mod tests_lifecycle;
