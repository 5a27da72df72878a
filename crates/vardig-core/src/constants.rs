//! Named constants of a type.
//!
//! Integer values of enum-like and flag-like types are described with the
//! names of the constants declared with that type: an exact match first, then
//! a `|`-joined decomposition into single-bit constants.

use smallvec::SmallVec;

/// One named constant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantValue
{
    /// Constant value.
    pub value: i64,
    /// Name with the package prefix of its type removed.
    pub name: String,
    /// Exactly one bit of `value` is set.
    pub single_bit: bool,
}

/// Constants declared with one type, sorted by value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConstantTable
{
    values: Vec<ConstantValue>,
}

/// Package path of a qualified type name (`net/http.ConnState` -> `net/http`).
fn package_name(type_name: &str) -> &str
{
    let last_slash = type_name.rfind('/').map_or(0, |i| i + 1);
    match type_name[last_slash..].find('.') {
        Some(dot) => &type_name[..last_slash + dot],
        None => "",
    }
}

impl ConstantTable
{
    /// Build the table for type `type_name` from `(value, qualified name)` pairs.
    pub fn new<I, S>(type_name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = (i64, S)>,
        S: Into<String>,
    {
        let prefix = format!("{}.", package_name(type_name));
        let mut values: Vec<ConstantValue> = values
            .into_iter()
            .map(|(value, name)| {
                let name: String = name.into();
                ConstantValue {
                    value,
                    name: name.strip_prefix(&prefix).map(str::to_string).unwrap_or(name),
                    single_bit: (value as u64).count_ones() == 1,
                }
            })
            .collect();
        values.sort_by_key(|v| v.value);
        Self { values }
    }

    /// Constants in value order.
    pub fn values(&self) -> &[ConstantValue]
    {
        &self.values
    }

    /// Describe `n` by name, or as an OR of single-bit constants.
    /// Returns `None` if neither works.
    pub fn describe(&self, n: i64) -> Option<String>
    {
        if let Some(exact) = self.values.iter().find(|v| v.value == n) {
            return Some(exact.name.clone());
        }
        if n == 0 {
            return None;
        }

        let mut rest = n;
        let mut fields: SmallVec<[&str; 8]> = SmallVec::new();
        for val in self.values.iter().filter(|v| v.single_bit) {
            if rest & val.value != 0 {
                fields.push(&val.name);
                rest &= !val.value;
            }
        }
        (rest == 0).then(|| fields.join("|"))
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn flags() -> ConstantTable
    {
        ConstantTable::new("os.FileMode", [
            (4, "os.ModeRead"),
            (1, "os.ModeExec"),
            (2, "os.ModeWrite"),
            (7, "os.ModeAll"),
        ])
    }

    #[test]
    fn test_exact_match_wins()
    {
        assert_eq!(flags().describe(7).as_deref(), Some("ModeAll"));
        assert_eq!(flags().describe(2).as_deref(), Some("ModeWrite"));
    }

    #[test]
    fn test_bitwise_decomposition()
    {
        assert_eq!(flags().describe(5).as_deref(), Some("ModeExec|ModeRead"));
        assert_eq!(flags().describe(8), None);
        assert_eq!(flags().describe(0), None);
    }

    #[test]
    fn test_sorted_and_prefix_trimmed()
    {
        let t = ConstantTable::new("net/http.ConnState", [(1, "net/http.StateActive"), (0, "net/http.StateNew")]);
        let names: Vec<_> = t.values().iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, ["StateNew", "StateActive"]);
        assert_eq!(package_name("main.Color"), "main");
        assert_eq!(package_name("int"), "");
    }
}
