use std::fmt;
use std::io;
use std::io::Write;
use std::str;

const TAB_WIDTH: usize = 4;

/// Line-oriented output that indents every line it starts by the current
/// tab depth.
pub struct Writer<F: Write> {
    out: F,
    spaces: Vec<usize>,
    line_started: bool,
}

impl<F: Write> Writer<F> {
    pub fn new(out: F) -> Writer<F> {
        Writer {
            out,
            spaces: vec![0],
            line_started: false,
        }
    }

    fn spaces(&self) -> usize {
        self.spaces.last().cloned().unwrap_or(0)
    }

    pub fn push_tab(&mut self) {
        let spaces = self.spaces() - (self.spaces() % TAB_WIDTH) + TAB_WIDTH;
        self.spaces.push(spaces);
    }

    pub fn pop_tab(&mut self) {
        assert!(self.spaces.len() > 1);
        self.spaces.pop();
    }

    pub fn new_line(&mut self) -> io::Result<()> {
        writeln!(self.out)?;
        self.line_started = false;
        Ok(())
    }

    pub fn new_lines(&mut self, lines: u32) -> io::Result<()> {
        for _ in 0..lines {
            self.new_line()?;
        }
        Ok(())
    }

    pub fn open_brace(&mut self) -> io::Result<()> {
        self.write(" {")?;
        self.push_tab();
        self.new_line()
    }

    pub fn close_brace(&mut self) -> io::Result<()> {
        self.pop_tab();
        self.write("}")
    }

    pub fn write(&mut self, text: &str) -> io::Result<()> {
        write!(self, "{}", text)
    }

    pub fn write_fmt(&mut self, fmt: fmt::Arguments) -> io::Result<()> {
        FmtWriter(self).write_fmt(fmt)
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

struct FmtWriter<'a, F: 'a + Write>(&'a mut Writer<F>);

impl<'a, F: Write> Write for FmtWriter<'a, F> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let writer = &mut self.0;

        let text =
            str::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let mut first_line = true;

        for line in text.split('\n') {
            if !first_line {
                writeln!(writer.out)?;
                writer.line_started = false;
            }

            if !writer.line_started && !line.is_empty() {
                for _ in 0..writer.spaces() {
                    write!(writer.out, " ")?;
                }
                writer.line_started = true;
            }
            write!(writer.out, "{}", line)?;

            first_line = false;
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indents_only_started_lines() {
        let mut out = Vec::new();
        {
            let mut writer = Writer::new(&mut out);
            writer.write("struct a").unwrap();
            writer.open_brace().unwrap();
            write!(writer, "int x;\n\nint y;\n").unwrap();
            writer.close_brace().unwrap();
            writer.new_line().unwrap();
        }
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "struct a {\n    int x;\n\n    int y;\n}\n"
        );
    }
}
