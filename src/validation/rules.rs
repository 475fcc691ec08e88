// Field validation rules
//
// Rules are a small AST rather than strings so that "strip store-dependent
// rules" is a pure filter over variants. The compact pipe-separated string
// form ("required|email|unique:users,email") is accepted at descriptor-build
// time and parsed once.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    Required,
    Email,
    Url,
    Numeric,
    Boolean,
    MinLength(usize),
    MaxLength(usize),
    InSet(Vec<String>),
    /// Field must match its `<field>_confirmation` counterpart.
    Confirmed,
    /// Value must not already exist in permanent storage.
    /// Stripped while no permanent store exists.
    UniqueInStore { table: String, column: String },
    /// Value must already exist in permanent storage.
    /// Stripped while no permanent store exists.
    ExistsInStore { table: String, column: String },
}

impl Rule {
    /// Rules that can only be evaluated against live permanent storage.
    pub fn needs_permanent_store(&self) -> bool {
        matches!(
            self,
            Rule::UniqueInStore { .. } | Rule::ExistsInStore { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Rule::Required => "required",
            Rule::Email => "email",
            Rule::Url => "url",
            Rule::Numeric => "numeric",
            Rule::Boolean => "boolean",
            Rule::MinLength(_) => "min",
            Rule::MaxLength(_) => "max",
            Rule::InSet(_) => "in",
            Rule::Confirmed => "confirmed",
            Rule::UniqueInStore { .. } => "unique",
            Rule::ExistsInStore { .. } => "exists",
        }
    }
}

/// Parse a pipe-separated rule string. Unknown or malformed rules are
/// rejected outright; a silently dropped rule would weaken a step's contract.
pub fn parse_rules(spec: &str) -> Result<Vec<Rule>, String> {
    let mut rules = Vec::new();

    for token in spec.split('|') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }

        let (name, args) = match token.split_once(':') {
            Some((n, a)) => (n.trim(), Some(a.trim())),
            None => (token, None),
        };

        let rule = match (name, args) {
            ("required", None) => Rule::Required,
            ("email", None) => Rule::Email,
            ("url", None) => Rule::Url,
            ("numeric", None) => Rule::Numeric,
            ("boolean", None) => Rule::Boolean,
            ("confirmed", None) => Rule::Confirmed,
            ("min", Some(n)) => Rule::MinLength(parse_length(name, n)?),
            ("max", Some(n)) => Rule::MaxLength(parse_length(name, n)?),
            ("in", Some(values)) => {
                let values: Vec<String> = values
                    .split(',')
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
                    .collect();
                if values.is_empty() {
                    return Err("'in' requires at least one value".to_string());
                }
                Rule::InSet(values)
            }
            ("unique", Some(target)) => {
                let (table, column) = parse_store_target(name, target)?;
                Rule::UniqueInStore { table, column }
            }
            ("exists", Some(target)) => {
                let (table, column) = parse_store_target(name, target)?;
                Rule::ExistsInStore { table, column }
            }
            (name, Some(_)) => return Err(format!("rule '{}' takes no arguments", name)),
            (name, None) => return Err(format!("unknown rule '{}'", name)),
        };

        rules.push(rule);
    }

    Ok(rules)
}

fn parse_length(name: &str, raw: &str) -> Result<usize, String> {
    raw.parse::<usize>()
        .map_err(|_| format!("'{}' requires a numeric argument, got '{}'", name, raw))
}

fn parse_store_target(name: &str, raw: &str) -> Result<(String, String), String> {
    let Some((table, column)) = raw.split_once(',') else {
        return Err(format!("'{}' requires 'table,column', got '{}'", name, raw));
    };
    let table = table.trim();
    let column = column.trim();
    if table.is_empty() || column.is_empty() {
        return Err(format!("'{}' requires 'table,column', got '{}'", name, raw));
    }
    Ok((table.to_string(), column.to_string()))
}

/// Split rules into (evaluable now, store-dependent). The second list is
/// recorded on the ValidationResult so stripping stays observable.
pub fn strip_store_rules(rules: &[Rule]) -> (Vec<Rule>, Vec<Rule>) {
    let (store, kept): (Vec<Rule>, Vec<Rule>) = rules
        .iter()
        .cloned()
        .partition(Rule::needs_permanent_store);
    (kept, store)
}
