use tree_sitter::{LanguageError, Node, Parser};

/// A single simple command: name plus raw argument texts as written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleCommand {
    pub name: String,
    pub args: Vec<String>,
}

pub struct BashParser {
    parser: Parser,
}

impl BashParser {
    pub fn new() -> Result<Self, LanguageError> {
        let mut parser = Parser::new();
        let lang = tree_sitter_bash::language();
        parser.set_language(&lang)?;
        Ok(Self { parser })
    }

    pub fn parse_to_tree(&mut self, source: &str) -> Option<tree_sitter::Tree> {
        self.parser.parse(source, None)
    }

    /// Returns the command when `source` is exactly one plain command:
    /// no lists, pipes, redirects, subshells or leading assignments.
    pub fn single_command(&mut self, source: &str) -> Option<SimpleCommand> {
        let tree = self.parse_to_tree(source)?;
        let root = tree.root_node();
        if root.has_error() {
            return None;
        }

        let mut cursor = root.walk();
        let statements: Vec<Node> = root
            .named_children(&mut cursor)
            .filter(|n| n.kind() != "comment")
            .collect();
        let [command] = statements.as_slice() else {
            return None;
        };
        if command.kind() != "command" {
            return None;
        }

        let mut cursor = command.walk();
        let has_extras = command.named_children(&mut cursor).any(|n| {
            matches!(
                n.kind(),
                "variable_assignment" | "file_redirect" | "heredoc_redirect" | "herestring_redirect"
            )
        });
        if has_extras {
            return None;
        }

        let name = command.child_by_field_name("name")?;
        let mut cursor = command.walk();
        let args = command
            .children_by_field_name("argument", &mut cursor)
            .map(|arg| source[arg.byte_range()].to_string())
            .collect();

        Some(SimpleCommand {
            name: source[name.byte_range()].to_string(),
            args,
        })
    }

    /// Text of every simple command in `source`, including those nested in
    /// lists, pipelines, subshells and substitutions. Falls back to splitting
    /// on separators when the grammar cannot make sense of the input.
    pub fn statements(&mut self, source: &str) -> Vec<String> {
        let Some(tree) = self.parse_to_tree(source) else {
            return split_on_separators(source);
        };
        let root = tree.root_node();
        if root.has_error() {
            return split_on_separators(source);
        }
        let mut out = Vec::new();
        collect_commands(root, source, &mut out);
        out
    }
}

fn collect_commands(node: Node, source: &str, out: &mut Vec<String>) {
    if node.kind() == "command" {
        out.push(source[node.byte_range()].to_string());
    }
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        collect_commands(child, source, out);
    }
}

pub(crate) fn split_on_separators(source: &str) -> Vec<String> {
    source
        .split(|c| matches!(c, ';' | '|' | '&' | '\n'))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
