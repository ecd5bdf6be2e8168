use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// One axis of the sweep matrix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterList {
    /// The variable name to use in command templates
    pub var: String,
    /// The values to substitute for the variable
    pub values: Vec<String>,
}

impl ParameterList {
    pub fn new(var: impl Into<String>, values: &[&str]) -> Self {
        Self {
            var: var.into(),
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }
}

/// One configuration of the sweep: a value per axis, in axis order
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParameterSet {
    values: Vec<(String, String)>,
}

impl ParameterSet {
    pub fn new<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, var: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(k, _)| k == var)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// True when every `var: value` condition holds for this configuration
    pub fn matches(&self, conditions: &HashMap<String, String>) -> bool {
        conditions
            .iter()
            .all(|(var, value)| self.get(var) == Some(value.as_str()))
    }

    /// Human readable label, e.g. `ipc x gpu`
    pub fn label(&self) -> String {
        if self.is_empty() {
            return "default".to_string();
        }
        self.values
            .iter()
            .map(|(_, v)| v.as_str())
            .collect::<Vec<_>>()
            .join(" x ")
    }

    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.values.iter().cloned().collect()
    }

    fn with(&self, var: &str, value: &str) -> Self {
        let mut values = self.values.clone();
        values.push((var.to_string(), value.to_string()));
        Self { values }
    }
}

impl fmt::Display for ParameterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pairs = self
            .values
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>();
        write!(f, "{}", pairs.join(", "))
    }
}

/// Every combination of the sweep's parameter lists.
///
/// The first list varies slowest, matching nested loops written in list order.
#[derive(Debug, Clone)]
pub struct ParameterMatrix {
    pub combinations: Vec<ParameterSet>,
}

impl ParameterMatrix {
    pub fn new(parameter_lists: &[ParameterList]) -> Self {
        let mut combinations = vec![ParameterSet::default()];

        for param_list in parameter_lists {
            let mut new_combinations =
                Vec::with_capacity(combinations.len() * param_list.values.len());
            for combination in &combinations {
                for value in &param_list.values {
                    new_combinations.push(combination.with(&param_list.var, value));
                }
            }
            combinations = new_combinations;
        }

        Self { combinations }
    }

    /// Substitute `{var}` placeholders, configuration values first, then `vars`.
    ///
    /// The template is scanned once, so substituted values are copied verbatim
    /// even when they contain braces.
    pub fn apply_parameters(
        command_template: &str,
        params: &ParameterSet,
        vars: &HashMap<String, String>,
    ) -> String {
        let mut command = String::with_capacity(command_template.len());
        let mut rest = command_template;

        while let Some(start) = rest.find('{') {
            command.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            match after.find(['{', '}']) {
                Some(end) if after[end..].starts_with('}') => {
                    let var = &after[..end];
                    match params.get(var).or_else(|| vars.get(var).map(String::as_str)) {
                        Some(value) => command.push_str(value),
                        None => {
                            command.push('{');
                            command.push_str(var);
                            command.push('}');
                        }
                    }
                    rest = &after[end + 1..];
                }
                // Stray brace: keep it and rescan from the next character
                _ => {
                    command.push('{');
                    rest = after;
                }
            }
        }
        command.push_str(rest);

        command
    }
}
