//! Configuration access port trait.

pub trait ConfigPort {
    fn get_string(&self, section: &str, key: &str) -> Option<String>;
    /// Falls back to `default` when the key is absent or not a number.
    fn get_double(&self, section: &str, key: &str, default: f64) -> f64;
    /// Falls back to `default` when the key is absent or not a boolean.
    fn get_bool(&self, section: &str, key: &str, default: bool) -> bool;
}
