//! シェルオプション（`set -e`、`set -o pipefail` 等）。

/// オプションフラグ。`letter` は `set -X` の 1 文字形式（なければ `None`）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellOption {
    AllExport,
    ErrExit,
    IgnoreEof,
    Monitor,
    NoClobber,
    NoGlob,
    NoExec,
    NoUnset,
    PipeFail,
    Verbose,
    Vi,
    XTrace,
}

/// `set -o` の表示順。
pub const ALL_OPTIONS: [ShellOption; 12] = [
    ShellOption::AllExport,
    ShellOption::ErrExit,
    ShellOption::IgnoreEof,
    ShellOption::Monitor,
    ShellOption::NoClobber,
    ShellOption::NoGlob,
    ShellOption::NoExec,
    ShellOption::NoUnset,
    ShellOption::PipeFail,
    ShellOption::Verbose,
    ShellOption::Vi,
    ShellOption::XTrace,
];

impl ShellOption {
    pub fn name(self) -> &'static str {
        match self {
            Self::AllExport => "allexport",
            Self::ErrExit => "errexit",
            Self::IgnoreEof => "ignoreeof",
            Self::Monitor => "monitor",
            Self::NoClobber => "noclobber",
            Self::NoGlob => "noglob",
            Self::NoExec => "noexec",
            Self::NoUnset => "nounset",
            Self::PipeFail => "pipefail",
            Self::Verbose => "verbose",
            Self::Vi => "vi",
            Self::XTrace => "xtrace",
        }
    }

    pub fn letter(self) -> Option<char> {
        match self {
            Self::AllExport => Some('a'),
            Self::ErrExit => Some('e'),
            Self::Monitor => Some('m'),
            Self::NoClobber => Some('C'),
            Self::NoGlob => Some('f'),
            Self::NoExec => Some('n'),
            Self::NoUnset => Some('u'),
            Self::Verbose => Some('v'),
            Self::XTrace => Some('x'),
            Self::IgnoreEof | Self::PipeFail | Self::Vi => None,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        ALL_OPTIONS.iter().copied().find(|o| o.name() == name)
    }

    pub fn from_letter(c: char) -> Option<Self> {
        ALL_OPTIONS.iter().copied().find(|o| o.letter() == Some(c))
    }

    fn bit(self) -> u16 {
        1 << (self as u16)
    }
}

/// オプションの集合。フレームごとにスコープ（Own/Copy/Share）が決まる。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Options {
    bits: u16,
}

impl Options {
    pub fn get(&self, opt: ShellOption) -> bool {
        self.bits & opt.bit() != 0
    }

    pub fn set(&mut self, opt: ShellOption, on: bool) {
        if on {
            self.bits |= opt.bit();
        } else {
            self.bits &= !opt.bit();
        }
    }

    /// `$-` の値。`interactive` は `i` を付けるかどうか。
    pub fn flags_string(&self, interactive: bool) -> String {
        let mut s: String = ALL_OPTIONS
            .iter()
            .filter(|o| self.get(**o))
            .filter_map(|o| o.letter())
            .collect();
        if interactive {
            s.push('i');
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_clear() {
        let mut o = Options::default();
        o.set(ShellOption::ErrExit, true);
        o.set(ShellOption::PipeFail, true);
        assert!(o.get(ShellOption::ErrExit));
        o.set(ShellOption::ErrExit, false);
        assert!(!o.get(ShellOption::ErrExit));
        assert!(o.get(ShellOption::PipeFail));
    }

    #[test]
    fn names_and_letters() {
        assert_eq!(ShellOption::from_name("nounset"), Some(ShellOption::NoUnset));
        assert_eq!(ShellOption::from_letter('C'), Some(ShellOption::NoClobber));
        assert_eq!(ShellOption::from_letter('z'), None);
    }

    #[test]
    fn dollar_dash() {
        let mut o = Options::default();
        o.set(ShellOption::ErrExit, true);
        o.set(ShellOption::XTrace, true);
        o.set(ShellOption::PipeFail, true);
        assert_eq!(o.flags_string(false), "ex");
        assert_eq!(o.flags_string(true), "exi");
    }
}
