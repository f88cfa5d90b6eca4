//! Textual dump of lowered programs.
//!
//! Output is close to a disassembly listing and is meant for debugging and
//! test diagnostics, not for round-tripping.

use std::fmt;

use super::{Block, Definition, InstrExtra, Instruction, Operand, Program, RegBank, RegClass, Temp};

impl fmt::Display for RegClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.bank {
            RegBank::Scalar => write!(f, "s{}", self.size),
            RegBank::Vector => write!(f, "v{}", self.size),
        }
    }
}

impl fmt::Display for Temp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}:{}", self.id, self.rc)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Temp(t) => write!(f, "{}", t),
            Operand::Const { bits, size: 1 } => write!(f, "0x{:x}", *bits as u32),
            Operand::Const { bits, .. } => write!(f, "0x{:x}", bits),
            Operand::Exec => write!(f, "exec"),
            Operand::Undef(rc) => write!(f, "undef:{}", rc),
        }
    }
}

impl fmt::Display for Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Definition::Temp(t) => write!(f, "{}", t),
            Definition::Exec => write!(f, "exec"),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, def) in self.defs.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", def)?;
        }
        if !self.defs.is_empty() {
            write!(f, " = ")?;
        }
        write!(f, "{:?}", self.opcode)?;
        for op in &self.operands {
            write!(f, " {}", op)?;
        }
        match &self.extra {
            InstrExtra::None => {}
            InstrExtra::Memory(m) => {
                write!(f, " offset:{}", m.offset)?;
                if m.offset1 != 0 {
                    write!(f, " offset1:{}", m.offset1)?;
                }
                if m.glc {
                    write!(f, " glc")?;
                }
                if m.dlc {
                    write!(f, " dlc")?;
                }
            }
            InstrExtra::Image(img) => {
                write!(f, " dim:{:?} dmask:0x{:x}", img.dim, img.dmask)?;
                if img.array {
                    write!(f, " array")?;
                }
            }
            InstrExtra::Branch(target) => write!(f, " -> {}", target)?,
            InstrExtra::Reduction { op, cluster } => write!(f, " op:{:?} cluster:{}", op, cluster)?,
            InstrExtra::Modifiers { neg, abs } => {
                if neg.iter().any(|&n| n) {
                    write!(f, " neg:{:?}", neg)?;
                }
                if abs.iter().any(|&a| a) {
                    write!(f, " abs:{:?}", abs)?;
                }
            }
        }
        Ok(())
    }
}

fn fmt_edges(f: &mut fmt::Formatter<'_>, label: &str, edges: &[super::BlockId]) -> fmt::Result {
    if edges.is_empty() {
        return Ok(());
    }
    write!(f, " {}:", label)?;
    for (i, e) in edges.iter().enumerate() {
        if i > 0 {
            write!(f, ",")?;
        }
        write!(f, " {}", e)?;
    }
    Ok(())
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: /* kind: 0x{:x} */", self.id, self.kind.0)?;
        fmt_edges(f, "logical-preds", &self.logical_preds)?;
        fmt_edges(f, "linear-preds", &self.linear_preds)?;
        writeln!(f)?;
        for instr in &self.instrs {
            writeln!(f, "    {}", instr)?;
        }
        write!(f, "    /*")?;
        fmt_edges(f, "logical-succs", &self.logical_succs)?;
        fmt_edges(f, "linear-succs", &self.linear_succs)?;
        writeln!(f, " */")
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "/* gen: {:?}, wave{}, needs_exact: {} */",
            self.config.gen,
            self.config.wave_size(),
            self.needs_exact
        )?;
        for block in &self.blocks {
            write!(f, "{}", block)?;
        }
        Ok(())
    }
}
