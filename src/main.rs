fn main() {
    dpyctl::cli::main();
}
