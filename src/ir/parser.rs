//! Control-unit parser.

use super::*;
use std::collections::HashMap;

pub fn parse_program(text: &str) -> CompileResult<Program> {
    let parser = Parser::new(text);
    parser.parse()
}

struct Parser<'a> {
    text: &'a str,
    pos: usize,
    program: Program,

    // Per-unit maps
    actions: HashMap<&'a str, usize>,
    tables: HashMap<&'a str, usize>,
    statement_resolves: Vec<Resolve<'a>>,
}

/// Call-like statement waiting for the unit's declarations.
#[derive(Debug)]
struct Resolve<'a> {
    node: NodeId,
    callee: &'a str,
    args: &'a str,
    is_apply: bool,
    pos: usize,
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(ch) if ch.is_alphabetic() || ch == '_' => {}
        _ => return false,
    }
    chars.all(|ch| ch.is_alphanumeric() || ch == '_')
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            pos: 0,
            program: Program::new(),
            actions: HashMap::new(),
            tables: HashMap::new(),
            statement_resolves: Vec::new(),
        }
    }

    fn parse(mut self) -> CompileResult<Program> {
        self.skip_whitespace();

        while !self.is_eof() {
            if let Err(e) = self.parse_unit() {
                let context_start = self.pos.saturating_sub(20);
                let context_end = (self.pos + 20).min(self.text.len());
                log::debug!(
                    "parse failed near {:?}",
                    self.text.get(context_start..context_end).unwrap_or("")
                );
                return Err(e);
            }
            self.skip_whitespace();
        }

        Ok(self.program)
    }

    fn error_at(&self, pos: usize, message: impl Into<String>) -> CompileError {
        let before = &self.text[..pos.min(self.text.len())];
        let line = before.matches('\n').count() + 1;
        let column = match before.rfind('\n') {
            Some(newline) => before[newline + 1..].chars().count() + 1,
            None => before.chars().count() + 1,
        };
        CompileError::Parse {
            line,
            column,
            message: message.into(),
        }
    }

    fn error(&self, message: impl Into<String>) -> CompileError {
        self.error_at(self.pos, message)
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.text.len()
    }

    fn current_char(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn advance(&mut self) {
        if let Some(ch) = self.current_char() {
            self.pos += ch.len_utf8();
        }
    }

    fn skip_whitespace(&mut self) {
        loop {
            let rest = &self.text[self.pos..];
            if rest.starts_with("//") {
                // Skip comment line
                match rest.find('\n') {
                    Some(newline) => self.pos += newline + 1,
                    None => self.pos = self.text.len(),
                }
            } else if self.current_char().is_some_and(char::is_whitespace) {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn try_read(&mut self, ch: char) -> bool {
        self.skip_whitespace();
        if self.current_char() == Some(ch) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, ch: char) -> CompileResult<()> {
        if !self.try_read(ch) {
            return Err(self.error(format!(
                "expected '{}' but found {:?}",
                ch,
                self.current_char()
            )));
        }
        Ok(())
    }

    fn read_identifier(&mut self) -> CompileResult<&'a str> {
        self.skip_whitespace();
        let start = self.pos;

        match self.current_char() {
            Some(ch) if ch.is_alphabetic() || ch == '_' => {}
            Some(ch) => return Err(self.error(format!("expected identifier but found '{}'", ch))),
            None => return Err(self.error("expected identifier but found end of input")),
        }

        while let Some(ch) = self.current_char() {
            if ch.is_alphanumeric() || ch == '_' {
                self.advance();
            } else {
                break;
            }
        }

        Ok(&self.text[start..self.pos])
    }

    /// Identifier at the cursor without consuming it.
    fn peek_identifier(&mut self) -> Option<&'a str> {
        let saved = self.pos;
        let ident = self.read_identifier().ok();
        self.pos = saved;
        ident
    }

    fn expect_keyword(&mut self, keyword: &str) -> CompileResult<()> {
        let start = self.pos;
        match self.read_identifier() {
            Ok(ident) if ident == keyword => Ok(()),
            _ => Err(self.error_at(start, format!("expected `{}`", keyword))),
        }
    }

    fn read_string(&mut self) -> CompileResult<&'a str> {
        self.expect('"')?;
        let start = self.pos;
        match self.text[start..].find('"') {
            Some(len) => {
                self.pos = start + len + 1;
                Ok(&self.text[start..start + len])
            }
            None => Err(self.error("unterminated string")),
        }
    }

    /// Text up to the `)` matching an already consumed `(`.
    fn read_balanced(&mut self) -> CompileResult<&'a str> {
        let start = self.pos;
        let mut depth = 0usize;
        while let Some(ch) = self.current_char() {
            match ch {
                '(' => depth += 1,
                ')' if depth == 0 => {
                    let inner = self.text[start..self.pos].trim();
                    self.advance();
                    return Ok(inner);
                }
                ')' => depth -= 1,
                _ => {}
            }
            self.advance();
        }
        Err(self.error_at(start, "unbalanced parentheses"))
    }

    /// Optional `@name("...")` annotation.
    fn parse_annotation(&mut self) -> CompileResult<Option<Alias>> {
        if !self.try_read('@') {
            return Ok(None);
        }
        self.expect_keyword("name")?;
        self.expect('(')?;
        let text = self.read_string()?;
        self.expect(')')?;
        Ok(Some(Alias::parse(text)))
    }

    fn parse_unit(&mut self) -> CompileResult<()> {
        self.expect_keyword("control")?;
        self.skip_whitespace();
        let name_pos = self.pos;
        let name = self.read_identifier()?;
        if self.program.units.iter().any(|u| u.name == name) {
            return Err(self.error_at(name_pos, format!("duplicate control `{}`", name)));
        }

        // Reset per-unit state
        self.actions.clear();
        self.tables.clear();
        self.statement_resolves.clear();

        if self.try_read('(') {
            self.read_balanced()?;
        }
        self.expect('{')?;

        let mut subroutines = Vec::new();
        let mut tables = Vec::new();
        let body = loop {
            self.skip_whitespace();
            let decl_pos = self.pos;
            match self.read_identifier()? {
                "action" => subroutines.push(self.parse_action(subroutines.len())?),
                "table" => tables.push(self.parse_table(tables.len())?),
                "apply" => {
                    self.skip_whitespace();
                    if self.current_char() != Some('{') {
                        return Err(self.error("expected block after `apply`"));
                    }
                    break self.parse_statement()?;
                }
                other => {
                    return Err(self.error_at(decl_pos, format!("unexpected `{}` in control", other)));
                }
            }
        };
        self.expect('}')?;

        for table in &tables {
            for action in &table.actions {
                if !self.actions.contains_key(action.name.as_str()) {
                    return Err(CompileError::UnresolvedAction {
                        dispatch: table.name.clone(),
                        action: action.name.clone(),
                    });
                }
            }
        }
        self.resolve_statements()?;

        self.program.units.push(Unit {
            name: name.to_string(),
            subroutines,
            tables,
            body,
            lowered: false,
        });
        Ok(())
    }

    fn parse_action(&mut self, index: usize) -> CompileResult<Subroutine> {
        self.skip_whitespace();
        let name_pos = self.pos;
        let name = self.read_identifier()?;
        if self.actions.insert(name, index).is_some() {
            return Err(self.error_at(name_pos, format!("duplicate action `{}`", name)));
        }

        let params = if self.try_read('(') {
            self.read_balanced()?
        } else {
            ""
        };
        let alias = self.parse_annotation()?;

        self.skip_whitespace();
        if self.current_char() != Some('{') {
            return Err(self.error("expected action body"));
        }
        let body = self.parse_statement()?;

        Ok(Subroutine {
            name: name.to_string(),
            params: params.to_string(),
            alias,
            body,
        })
    }

    fn parse_table(&mut self, index: usize) -> CompileResult<DispatchTable> {
        self.skip_whitespace();
        let name_pos = self.pos;
        let name = self.read_identifier()?;
        if self.tables.insert(name, index).is_some() {
            return Err(self.error_at(name_pos, format!("duplicate table `{}`", name)));
        }

        let alias = self.parse_annotation()?;
        self.expect('{')?;

        let mut actions: Vec<ActionRef> = Vec::new();
        while !self.try_read('}') {
            self.skip_whitespace();
            let entry_pos = self.pos;
            let action = self.read_identifier()?;
            if actions.iter().any(|a| a.name == action) {
                return Err(self.error_at(
                    entry_pos,
                    format!("action `{}` listed twice in table `{}`", action, name),
                ));
            }
            let entry_alias = self.parse_annotation()?;
            self.expect(';')?;
            actions.push(ActionRef {
                name: action.to_string(),
                alias: entry_alias,
            });
        }

        Ok(DispatchTable {
            name: name.to_string(),
            alias,
            actions,
        })
    }

    fn parse_statement(&mut self) -> CompileResult<NodeId> {
        self.skip_whitespace();

        if self.try_read('{') {
            let mut stmts = Vec::new();
            while !self.try_read('}') {
                if self.is_eof() {
                    return Err(self.error("unterminated block"));
                }
                stmts.push(self.parse_statement()?);
            }
            return Ok(self.program.add(NodeKind::Block { stmts }));
        }

        match self.peek_identifier() {
            Some("if") => self.parse_if(),
            Some("switch") => self.parse_switch(),
            _ => self.parse_simple_statement(),
        }
    }

    fn parse_if(&mut self) -> CompileResult<NodeId> {
        self.expect_keyword("if")?;
        self.expect('(')?;
        let cond = self.read_balanced()?;
        let taken = self.parse_statement()?;

        let not_taken = if self.peek_identifier() == Some("else") {
            self.expect_keyword("else")?;
            Some(self.parse_statement()?)
        } else {
            None
        };

        Ok(self.program.add(NodeKind::If {
            cond: cond.to_string(),
            taken,
            not_taken,
        }))
    }

    fn parse_switch(&mut self) -> CompileResult<NodeId> {
        self.expect_keyword("switch")?;
        self.expect('(')?;
        let selector = self.read_balanced()?;
        self.expect('{')?;

        let mut cases = Vec::new();
        while !self.try_read('}') {
            let label = self.read_identifier()?;
            self.expect(':')?;
            self.skip_whitespace();
            let body = if self.current_char() == Some('{') {
                Some(self.parse_statement()?)
            } else {
                None
            };
            cases.push(SwitchCase {
                label: label.to_string(),
                body,
            });
        }

        Ok(self.program.add(NodeKind::Switch {
            selector: selector.to_string(),
            cases,
        }))
    }

    /// Everything up to the next top-level `;`.
    fn parse_simple_statement(&mut self) -> CompileResult<NodeId> {
        let start = self.pos;
        let mut depth = 0usize;
        loop {
            match self.current_char() {
                None => return Err(self.error_at(start, "statement is missing ';'")),
                Some(';') if depth == 0 => break,
                Some('{') | Some('}') if depth == 0 => {
                    return Err(self.error("unexpected brace in statement"));
                }
                Some('(') => depth += 1,
                Some(')') => depth = depth.saturating_sub(1),
                _ => {}
            }
            self.advance();
        }
        let text = self.text[start..self.pos].trim();
        self.advance();

        if text.is_empty() {
            return Err(self.error_at(start, "empty statement"));
        }

        let node = self.program.add(NodeKind::Leaf {
            text: text.to_string(),
        });
        if let Some(resolve) = Self::call_like(node, text, start) {
            self.statement_resolves.push(resolve);
        }
        Ok(node)
    }

    fn call_like(node: NodeId, text: &'a str, pos: usize) -> Option<Resolve<'a>> {
        if let Some(table) = text.strip_suffix(".apply()") {
            let table = table.trim();
            if is_identifier(table) {
                return Some(Resolve {
                    node,
                    callee: table,
                    args: "",
                    is_apply: true,
                    pos,
                });
            }
        }

        let open = text.find('(')?;
        if !text.ends_with(')') {
            return None;
        }
        let callee = text[..open].trim();
        if !is_identifier(callee) {
            return None;
        }

        // The first '(' must close at the end of the statement.
        let mut depth = 0usize;
        for (idx, ch) in text[open..].char_indices() {
            match ch {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 && open + idx != text.len() - 1 {
                        return None;
                    }
                }
                _ => {}
            }
        }

        Some(Resolve {
            node,
            callee,
            args: text[open + 1..text.len() - 1].trim(),
            is_apply: false,
            pos,
        })
    }

    fn resolve_statements(&mut self) -> CompileResult<()> {
        let resolves = std::mem::take(&mut self.statement_resolves);
        for resolve in resolves {
            if resolve.is_apply {
                if !self.tables.contains_key(resolve.callee) {
                    log::debug!("unknown table at {}", resolve.pos);
                    return Err(CompileError::UnresolvedDispatch {
                        name: resolve.callee.to_string(),
                    });
                }
                self.program.set_leaf_kind(
                    resolve.node,
                    NodeKind::Apply {
                        table: resolve.callee.to_string(),
                    },
                );
            } else if self.actions.contains_key(resolve.callee) {
                self.program.set_leaf_kind(
                    resolve.node,
                    NodeKind::Call {
                        target: resolve.callee.to_string(),
                        args: resolve.args.to_string(),
                    },
                );
            }
            // Calls to anything else stay plain statements (externs, primitives).
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Program {
        Program::parse(text).unwrap_or_else(|e| panic!("failed to parse: {}", e))
    }

    fn body_stmts(program: &Program, id: NodeId) -> Vec<NodeId> {
        match program.kind(id) {
            NodeKind::Block { stmts } => stmts.clone(),
            other => panic!("expected block, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_declarations() {
        let program = parse(
            r#"
// forwarding
control ingress(inout headers hdr) {
    action fwd(port) @name("ingress.fwd") { egress = port; }
    action drop_pkt() { mark_to_drop(); }
    table route @name("ingress.route") {
        fwd;
        drop_pkt @name("ingress.route_drop");
    }
    apply {
        route.apply();
    }
}
"#,
        );

        assert_eq!(program.units.len(), 1);
        let unit = &program.units[0];
        assert_eq!(unit.name, "ingress");
        assert_eq!(unit.subroutines.len(), 2);
        assert_eq!(unit.subroutines[0].params, "port");
        assert_eq!(unit.subroutines[0].alias.as_ref().unwrap().local(), "fwd");
        assert!(unit.subroutines[1].alias.is_none());

        let table = unit.table("route").unwrap();
        assert_eq!(table.key(), "ingress.route");
        assert_eq!(table.actions.len(), 2);
        assert_eq!(table.actions[1].alias.as_ref().unwrap().local(), "route_drop");

        let stmts = body_stmts(&program, unit.body);
        assert_eq!(program.kind(stmts[0]), &NodeKind::Apply { table: "route".to_string() });
    }

    #[test]
    fn test_parse_branches() {
        let program = parse(
            r#"
control c {
    action a() { x = 1; }
    apply {
        if (h.valid) { a(); } else if (y == 2) { z = f(1, (2)); }
        switch (sel) {
            one: { a(); }
            two:
            default: { w = 0; }
        }
    }
}
"#,
        );

        let unit = &program.units[0];
        let stmts = body_stmts(&program, unit.body);
        assert_eq!(stmts.len(), 2);

        match program.kind(stmts[0]) {
            NodeKind::If { cond, not_taken, .. } => {
                assert_eq!(cond, "h.valid");
                let nested = not_taken.unwrap();
                assert!(matches!(program.kind(nested), NodeKind::If { .. }));
            }
            other => panic!("expected if, got {:?}", other),
        }

        match program.kind(stmts[1]) {
            NodeKind::Switch { selector, cases } => {
                assert_eq!(selector, "sel");
                assert_eq!(cases.len(), 3);
                assert!(cases[0].body.is_some());
                assert!(cases[1].body.is_none());
                assert_eq!(cases[2].label, "default");
            }
            other => panic!("expected switch, got {:?}", other),
        }
    }

    #[test]
    fn test_call_resolution() {
        let program = parse(
            r#"
control c {
    action a(v) { x = v; }
    apply {
        a(3);
        mark_to_drop();
        later();
    }
}
"#,
        );

        let stmts = body_stmts(&program, program.units[0].body);
        assert_eq!(
            program.kind(stmts[0]),
            &NodeKind::Call { target: "a".to_string(), args: "3".to_string() }
        );
        assert!(matches!(program.kind(stmts[1]), NodeKind::Leaf { .. }));
        assert!(matches!(program.kind(stmts[2]), NodeKind::Leaf { .. }));
    }

    #[test]
    fn test_unknown_table_is_error() {
        let err = Program::parse("control c { apply { ghost.apply(); } }").unwrap_err();
        assert!(matches!(err, CompileError::UnresolvedDispatch { ref name } if name == "ghost"));
    }

    #[test]
    fn test_table_with_unknown_action_is_error() {
        let err = Program::parse("control c { table t { nope; } apply { t.apply(); } }").unwrap_err();
        assert!(matches!(err, CompileError::UnresolvedAction { .. }));
    }

    #[test]
    fn test_duplicate_names_are_errors() {
        let err = Program::parse(
            "control c {\n  action a() { }\n  action a() { }\n  apply { }\n}",
        )
        .unwrap_err();
        match err {
            CompileError::Parse { line, column, .. } => {
                assert_eq!(line, 3);
                assert_eq!(column, 10);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_action_listed_twice_in_table_is_error() {
        let err = Program::parse(
            "control c {\n  action a() { }\n  table t {\n    a;\n    a;\n  }\n  apply { t.apply(); }\n}",
        )
        .unwrap_err();
        match err {
            CompileError::Parse { line, column, message } => {
                assert_eq!((line, column), (5, 5));
                assert!(message.contains("listed twice"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_missing_semicolon_reports_position() {
        let err = Program::parse("control c {\n  apply {\n    x = 1\n  }\n}").unwrap_err();
        assert!(matches!(err, CompileError::Parse { line: 4, .. }));
    }
}
