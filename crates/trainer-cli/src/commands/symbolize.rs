//! Symbolize command implementation.
//!
//! Fatal reports carry the call stack relative to the image base so it can be
//! matched against a build's map file. With `--base` the frames are turned back
//! into absolute addresses for a debugger session.

use anyhow::Result;
use trainer_core::CallStack;

use super::parse::parse_hex_address;

/// Run the symbolize command
pub fn run(stack: &str, base: Option<&str>) -> Result<()> {
    let stack: CallStack = stack.parse()?;
    let base = base.map(parse_hex_address).transpose()?;

    for line in render(&stack, base) {
        println!("{}", line);
    }
    Ok(())
}

fn render(stack: &CallStack, base: Option<u64>) -> Vec<String> {
    match base {
        Some(base) => stack
            .frames()
            .iter()
            .zip(stack.regenerate(base))
            .enumerate()
            .map(|(i, (frame, absolute))| {
                format!("#{:<2} {:#018X}  image+{:#X}", i, absolute, frame)
            })
            .collect(),
        None => stack
            .frames()
            .iter()
            .enumerate()
            .map(|(i, frame)| format!("#{:<2} image+{:#X}", i, frame))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_with_base() {
        let stack: CallStack = "0x1000 0x2A".parse().unwrap();
        let lines = render(&stack, Some(0x1_4000_0000));
        assert_eq!(lines[0], "#0  0x0000000140001000  image+0x1000");
        assert_eq!(lines[1], "#1  0x000000014000002A  image+0x2A");
    }

    #[test]
    fn test_render_relative() {
        let stack: CallStack = "0x10".parse().unwrap();
        assert_eq!(render(&stack, None), vec!["#0  image+0x10".to_string()]);
    }
}
