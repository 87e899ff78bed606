//! Separator-parameterised path algebra.
//!
//! Remote backends use `/`; the local backend uses the platform separator,
//! which on Windows roots paths at a drive (`C:\`).

fn is_drive(component: &str) -> bool {
    let bytes = component.as_bytes();
    bytes.len() == 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

fn sep_str(sep: char) -> String {
    sep.to_string()
}

/// Non-empty components of `path`.
pub fn path_components(sep: char, path: &str) -> Vec<String> {
    path.split(sep)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn is_root(sep: char, path: &str) -> bool {
    let components = path_components(sep, path);
    match components.as_slice() {
        [] => true,
        [only] => sep == '\\' && is_drive(only),
        _ => false,
    }
}

/// Join `name` (one or more components) onto `base`.
pub fn join_path(sep: char, base: &str, name: &str) -> String {
    let name = name.trim_start_matches(sep);
    if name.is_empty() {
        return base.to_string();
    }
    if base.is_empty() {
        return name.to_string();
    }
    let base = base.trim_end_matches(sep);
    format!("{}{}{}", base, sep, name)
}

pub fn with_trailing_separator(sep: char, path: &str) -> String {
    if path.ends_with(sep) {
        path.to_string()
    } else {
        format!("{}{}", path, sep)
    }
}

/// Last component, `None` at the root.
pub fn file_name(sep: char, path: &str) -> Option<String> {
    if is_root(sep, path) {
        return None;
    }
    path_components(sep, path).pop()
}

/// Parent directory, `None` at the root.
pub fn parent_path(sep: char, path: &str) -> Option<String> {
    if is_root(sep, path) {
        return None;
    }
    let mut components = path_components(sep, path);
    components.pop();
    let absolute = path.starts_with(sep);
    Some(rebuild(sep, absolute, &components))
}

fn rebuild(sep: char, absolute: bool, components: &[String]) -> String {
    let body = components.join(&sep_str(sep));
    if absolute {
        format!("{}{}", sep, body)
    } else if components.len() == 1 && is_drive(&components[0]) {
        format!("{}{}", body, sep)
    } else {
        body
    }
}

/// Collapse repeated separators and resolve `.` / `..`.
pub fn normalize(sep: char, path: &str) -> String {
    let path = if sep == '\\' {
        path.replace('/', "\\")
    } else {
        path.to_string()
    };
    let absolute = path.starts_with(sep);
    let mut out: Vec<String> = Vec::new();
    for component in path.split(sep) {
        match component {
            "" | "." => {}
            ".." => match out.last() {
                Some(last) if last != ".." && !is_drive(last) => {
                    out.pop();
                }
                Some(last) if is_drive(last) => {}
                _ if absolute => {}
                _ => out.push("..".to_string()),
            },
            other => out.push(other.to_string()),
        }
    }
    rebuild(sep, absolute, &out)
}

/// Components leading from `from` to `to`, using `..` to climb.
pub fn relative_path_components(sep: char, from: &str, to: &str) -> Vec<String> {
    let from = path_components(sep, &normalize(sep, from));
    let to = path_components(sep, &normalize(sep, to));
    let common = from
        .iter()
        .zip(to.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let mut result: Vec<String> = std::iter::repeat("..".to_string())
        .take(from.len() - common)
        .collect();
    result.extend(to[common..].iter().cloned());
    result
}

pub fn relative_path(sep: char, from: &str, to: &str) -> String {
    relative_path_components(sep, from, to).join(&sep_str(sep))
}
