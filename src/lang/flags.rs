use bitflags::bitflags;

bitflags! {
    /// Switches that change how a compilation unit is lexed, checked and emitted.
    ///
    /// The raw bits are written verbatim into the object file header.
    #[derive(Default)]
    pub struct CompileFlags: u32 {
        /// Emit `BREAKPOINT` instructions and the per-instruction debug table.
        const DEBUG = 0x01;
        /// The unit is a library: no default `engine` state is required.
        const LIBRARY = 0x02;
        /// Warnings abort compilation.
        const TREAT_WARNINGS_AS_ERRORS = 0x04;
        /// Messages abort compilation.
        const TREAT_MESSAGES_AS_ERRORS = 0x08;
        /// Skip the peephole optimizer.
        const NO_OPTIMIZE = 0x10;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_empty() {
        assert!(CompileFlags::default().is_empty());
    }

    #[test]
    fn test_bits_roundtrip() {
        let flags = CompileFlags::DEBUG | CompileFlags::LIBRARY;
        assert_eq!(flags.bits(), 0x03);
        assert_eq!(CompileFlags::from_bits(0x03), Some(flags));
        assert_eq!(CompileFlags::from_bits(0x80), None);
    }
}
