// ABOUTME: Cyclomatic complexity of a function body from its tree-sitter subtree
// ABOUTME: One plus the number of branch points, with short-circuit operators counted as branches

use tree_sitter::Node;

/// `1 + branch points` within `node`.
pub fn cyclomatic_complexity(node: Node<'_>) -> f32 {
    1.0 + branch_points(node) as f32
}

fn branch_points(root: Node<'_>) -> usize {
    let mut count = 0;
    let mut cursor = root.walk();
    let mut descending = true;

    // iterative pre-order walk; deep expression trees would overflow a recursive one
    loop {
        if descending {
            let node = cursor.node();
            if is_branch(node.kind()) {
                count += 1;
            }
            if is_short_circuit(node) {
                count += 1;
            }
            if cursor.goto_first_child() {
                continue;
            }
        }
        if cursor.goto_next_sibling() {
            descending = true;
            continue;
        }
        if !cursor.goto_parent() || cursor.node() == root {
            break;
        }
        descending = false;
    }
    count
}

fn is_short_circuit(node: Node<'_>) -> bool {
    if !matches!(node.kind(), "binary_expression" | "boolean_operator") {
        return false;
    }
    node.child_by_field_name("operator")
        .map(|op| matches!(op.kind(), "&&" | "||" | "and" | "or" | "??"))
        .unwrap_or(false)
}

fn is_branch(kind: &str) -> bool {
    matches!(
        kind,
        "if_expression"
            | "if_statement"
            | "elif_clause"
            | "while_expression"
            | "while_statement"
            | "do_statement"
            | "for_expression"
            | "for_statement"
            | "for_in_statement"
            | "loop_expression"
            | "match_arm"
            | "switch_case"
            | "expression_case"
            | "type_case"
            | "communication_case"
            | "case_clause"
            | "ternary_expression"
            | "conditional_expression"
            | "catch_clause"
            | "except_clause"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LanguageRegistry;
    use codeatlas_core::Language;

    fn complexity_of_first_function(language: Language, code: &str, kind: &str) -> f32 {
        let mut parser = LanguageRegistry::new().create_parser(&language).unwrap();
        let tree = parser.parse(code, None).unwrap();
        let root = tree.root_node();
        let mut cursor = root.walk();
        let function = root
            .named_children(&mut cursor)
            .find(|n| n.kind() == kind)
            .expect("function node");
        cyclomatic_complexity(function)
    }

    #[test]
    fn test_straight_line_rust_is_one() {
        let c = complexity_of_first_function(
            Language::Rust,
            "fn simple() -> i32 { let x = 1; x + 1 }",
            "function_item",
        );
        assert_eq!(c, 1.0);
    }

    #[test]
    fn test_rust_branches_and_operators() {
        let code = r#"
fn check(a: i32, b: bool) -> i32 {
    if a > 0 && b {
        return 1;
    }
    for i in 0..a {
        if i == 3 || i == 5 { break; }
    }
    match a {
        0 => 0,
        1 => 1,
        _ => 2,
    }
}
"#;
        // if, &&, for, if, ||, three match arms
        assert_eq!(
            complexity_of_first_function(Language::Rust, code, "function_item"),
            9.0
        );
    }

    #[test]
    fn test_python_branches() {
        let code = r#"
def classify(x):
    if x > 10 and x < 20:
        return "teen"
    elif x < 0:
        return "negative"
    while x > 100:
        x -= 1
    return "other"
"#;
        // if, and, elif, while
        assert_eq!(
            complexity_of_first_function(Language::Python, code, "function_definition"),
            5.0
        );
    }

    #[test]
    fn test_typescript_ternary_and_catch() {
        let code = r#"
function load(path: string): string {
    try {
        return path ? read(path) : "";
    } catch (e) {
        return "";
    }
}
"#;
        assert_eq!(
            complexity_of_first_function(Language::TypeScript, code, "function_declaration"),
            3.0
        );
    }
}
