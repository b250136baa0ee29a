//! Unparser for [`Program`].
//!
//! Renders the same surface syntax the parser accepts. Synthetic updates are
//! printed as plain assignments, so instrumented output parses again.

use super::*;
use crate::core::options::InstrumentOptions;

const INDENT: &str = "    ";

pub struct Printer {
    accumulator: String,
    register_prefix: String,
}

impl Default for Printer {
    fn default() -> Self {
        Self::new(&InstrumentOptions::default())
    }
}

impl Printer {
    pub fn new(options: &InstrumentOptions) -> Self {
        Self {
            accumulator: options.accumulator.clone(),
            register_prefix: options.register_prefix.clone(),
        }
    }

    pub fn print(&self, program: &Program) -> String {
        let mut output = String::new();
        for (idx, unit) in program.units.iter().enumerate() {
            if idx > 0 {
                output.push('\n');
            }
            self.print_unit(program, unit, &mut output);
        }
        output
    }

    pub fn print_unit(&self, program: &Program, unit: &Unit, output: &mut String) {
        output.push_str(&format!("control {} {{\n", unit.name));

        for action in &unit.subroutines {
            output.push_str(&format!("{}action {}({})", INDENT, action.name, action.params));
            push_alias(output, action.alias.as_ref());
            output.push(' ');
            self.print_braced(program, action.body, 1, output);
            output.push('\n');
        }

        for table in &unit.tables {
            output.push_str(&format!("{}table {}", INDENT, table.name));
            push_alias(output, table.alias.as_ref());
            output.push_str(" {\n");
            for entry in &table.actions {
                output.push_str(&format!("{}{}{}", INDENT, INDENT, entry.name));
                push_alias(output, entry.alias.as_ref());
                output.push_str(";\n");
            }
            output.push_str(&format!("{}}}\n", INDENT));
        }

        output.push_str(&format!("{}apply ", INDENT));
        self.print_braced(program, unit.body, 1, output);
        output.push_str("\n}\n");
    }

    fn counter_name(&self, counter: Counter) -> String {
        match counter {
            Counter::Path => self.accumulator.clone(),
            Counter::Physical(register) => format!("{}{}", self.register_prefix, register),
        }
    }

    /// Print `id` as a braced block; non-block statements get wrapped.
    fn print_braced(&self, program: &Program, id: NodeId, depth: usize, output: &mut String) {
        output.push_str("{\n");
        match program.kind(id) {
            NodeKind::Block { stmts } => {
                for stmt in stmts {
                    self.print_statement(program, *stmt, depth + 1, output);
                }
            }
            _ => self.print_statement(program, id, depth + 1, output),
        }
        output.push_str(&INDENT.repeat(depth));
        output.push('}');
    }

    fn print_statement(&self, program: &Program, id: NodeId, depth: usize, output: &mut String) {
        output.push_str(&INDENT.repeat(depth));
        match program.kind(id) {
            NodeKind::Block { .. } => self.print_braced(program, id, depth, output),
            NodeKind::If { .. } => self.print_if(program, id, depth, output),
            NodeKind::Switch { selector, cases } => {
                output.push_str(&format!("switch ({}) {{\n", selector));
                for case in cases {
                    output.push_str(&INDENT.repeat(depth + 1));
                    output.push_str(&case.label);
                    output.push(':');
                    if let Some(body) = case.body {
                        output.push(' ');
                        self.print_braced(program, body, depth + 1, output);
                    }
                    output.push('\n');
                }
                output.push_str(&INDENT.repeat(depth));
                output.push('}');
            }
            NodeKind::Leaf { text } => {
                output.push_str(text);
                output.push(';');
            }
            NodeKind::Call { target, args } => {
                output.push_str(&format!("{}({});", target, args));
            }
            NodeKind::Apply { table } => {
                output.push_str(&format!("{}.apply();", table));
            }
            NodeKind::Accumulate { counter, amount } => {
                let name = self.counter_name(*counter);
                output.push_str(&format!("{} = {} + {};", name, name, amount));
            }
        }
        output.push('\n');
    }

    fn print_if(&self, program: &Program, id: NodeId, depth: usize, output: &mut String) {
        if let NodeKind::If { cond, taken, not_taken } = program.kind(id) {
            output.push_str(&format!("if ({}) ", cond));
            self.print_braced(program, *taken, depth, output);
            if let Some(not_taken) = not_taken {
                output.push_str(" else ");
                if matches!(program.kind(*not_taken), NodeKind::If { .. }) {
                    self.print_if(program, *not_taken, depth, output);
                } else {
                    self.print_braced(program, *not_taken, depth, output);
                }
            }
        }
    }
}

fn push_alias(output: &mut String, alias: Option<&Alias>) {
    if let Some(alias) = alias {
        output.push_str(&format!(" @name(\"{}\")", alias));
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.print())
    }
}
