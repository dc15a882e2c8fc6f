//! `functions` - list the registered aggregate functions

use clap::Args;
use colored::Colorize;
use processor::AggregateRegistry;

#[derive(Args, Debug, Clone, Default)]
pub struct FunctionsCommand {}

impl FunctionsCommand {
    pub fn execute(&self) -> anyhow::Result<()> {
        println!("{}", "Aggregate functions:".bold().cyan());
        for name in sorted_names(&AggregateRegistry::with_defaults()) {
            println!("  {}", name.green());
        }
        Ok(())
    }
}

fn sorted_names(registry: &AggregateRegistry) -> Vec<String> {
    let mut names: Vec<String> = registry.names().into_iter().map(str::to_string).collect();
    names.sort();
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_are_listed_sorted() {
        let names = sorted_names(&AggregateRegistry::with_defaults());
        assert!(names.contains(&"sum".to_string()));
        assert!(names.contains(&"count".to_string()));
        assert!(names.windows(2).all(|w| w[0] <= w[1]));
    }
}
