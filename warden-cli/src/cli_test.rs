#[cfg(test)]
mod tests {
    use clap::Parser;

    use crate::{Cli, Commands};

    #[test]
    fn zero_interval_is_rejected() {
        let err = Cli::try_parse_from(["warden", "watch", "--interval", "0"])
            .err()
            .expect("zero interval must not parse");
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn positive_interval_is_accepted() {
        let cli = Cli::try_parse_from(["warden", "watch", "--interval", "5"]).unwrap();
        match cli.command {
            Commands::Watch { interval, action, .. } => {
                assert_eq!(interval, Some(5));
                assert!(action.is_none());
            }
            _ => panic!("expected the watch command"),
        }
    }
}
