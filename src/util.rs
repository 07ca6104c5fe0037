//! Small utility helpers used across modules.

/// Very small and safe string templating.
/// Replaces occurrences of `{key}` in the template with provided values.
/// This is intentionally simple (no nested/conditional logic).
pub fn fill_template(tpl: &str, pairs: &[(&str, &str)]) -> String {
  let mut out = tpl.to_string();
  for (k, v) in pairs {
    let needle = format!("{{{}}}", k);
    out = out.replace(&needle, v);
  }
  out
}

/// Log-safe truncation for large strings.
/// Avoids spamming logs with huge prompts or backend responses.
pub fn trunc_for_log(s: &str, max: usize) -> String {
  if s.len() <= max {
    return s.to_string();
  }
  let mut cut = max;
  while !s.is_char_boundary(cut) { cut -= 1; }
  format!("{}… ({} bytes total)", &s[..cut], s.len())
}

/// Whitespace-separated word count.
pub fn word_count(s: &str) -> usize {
  s.split_whitespace().count()
}

/// Labels that open a sub-part of a multi-part question, e.g. "(i)" or "2.".
const PART_LABELS: &[&str] = &[
  "(i)", "(ii)", "(iii)", "(iv)", "(v)", "(vi)",
  "(a)", "(b)", "(c)", "(d)", "(e)",
  "1.", "2.", "3.", "4.", "5.",
];

/// Number of lines starting with a sub-part label. The label must be followed by whitespace
/// or end the line, so "1.5 kg" is not a part.
pub fn count_part_labels(text: &str) -> usize {
  text
    .lines()
    .map(str::trim)
    .filter(|line| {
      PART_LABELS.iter().any(|label| {
        line
          .strip_prefix(label)
          .map_or(false, |rest| rest.chars().next().map_or(true, char::is_whitespace))
      })
    })
    .count()
}

pub fn is_multi_part(text: &str) -> bool {
  count_part_labels(text) > 0
}

/// True if the text uses a single-letter symbolic variable such as `x` in `2x + 3 = 7`.
///
/// A letter counts as a variable when it stands alone (or glued to a coefficient)
/// and sits next to an arithmetic operator, '=' or a digit. Plain prose like
/// "a car" does not qualify because no operator is adjacent.
pub fn has_symbolic_variable(text: &str) -> bool {
  let chars: Vec<char> = text.chars().collect();
  let is_op = |c: char| matches!(c, '+' | '-' | '*' | '/' | '=' | '^' | '×' | '÷' | '<' | '>');

  for (i, &c) in chars.iter().enumerate() {
    if !c.is_ascii_alphabetic() {
      continue;
    }
    let prev = if i > 0 { Some(chars[i - 1]) } else { None };
    let next = chars.get(i + 1).copied();
    // part of a longer word
    if prev.map_or(false, |p| p.is_ascii_alphabetic()) || next.map_or(false, |n| n.is_ascii_alphabetic()) {
      continue;
    }

    // unit suffix such as km/h
    if prev == Some('/') && i >= 2 && chars[i - 2].is_ascii_alphabetic() {
      continue;
    }

    let left = chars[..i].iter().rev().find(|ch| !ch.is_whitespace()).copied();
    let right = chars[i + 1..].iter().find(|ch| !ch.is_whitespace()).copied();
    let glued_to_coefficient = prev.map_or(false, |p| p.is_ascii_digit());
    let near_op = left.map_or(false, is_op) || right.map_or(false, is_op);
    if glued_to_coefficient || near_op {
      return true;
    }
  }
  false
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fill_template_replaces_every_placeholder() {
    let out = fill_template("{a} and {b} and {a}", &[("a", "x"), ("b", "y")]);
    assert_eq!(out, "x and y and x");
  }

  #[test]
  fn trunc_for_log_respects_char_boundaries() {
    let s = "ééééé";
    let out = trunc_for_log(s, 3);
    assert!(out.starts_with('é'));
    assert!(out.contains("10 bytes total"));
    assert_eq!(trunc_for_log("short", 10), "short");
  }

  #[test]
  fn part_labels_are_counted_per_line() {
    let q = "A test has 10 questions.\n(i) What is the score?\n(ii) How many were correct?";
    assert_eq!(count_part_labels(q), 2);
    assert!(is_multi_part(q));
    assert!(!is_multi_part("A car travels 450 km. How far on 50 liters?"));
  }

  #[test]
  fn decimals_at_line_start_are_not_part_labels() {
    assert_eq!(count_part_labels("1.5 kg of rice costs 60 rupees.\n2.25 liters of milk costs 54 rupees."), 0);
    assert!(!is_multi_part("3.5 meters of cloth cost 140 rupees. What does 1 meter cost?"));
    assert_eq!(count_part_labels("Answer both parts.\n1. How many?\n2.\nHow much?"), 2);
  }

  #[test]
  fn symbolic_variables_need_an_operator_or_coefficient() {
    assert!(has_symbolic_variable("Solve for x: 2x + 3 = 7"));
    assert!(has_symbolic_variable("If y = 4, find y - 1"));
    assert!(!has_symbolic_variable("A car travels 450 km on 30 liters."));
    assert!(!has_symbolic_variable("Riya has 5 apples and buys 3 more."));
    assert!(!has_symbolic_variable("A train travels at 60 km/h for 3 hours."));
  }
}
