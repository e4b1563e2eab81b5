fn main() -> anyhow::Result<std::process::ExitCode> {
    pinecheck::run()
}
