fn main() {
    inspector_lib::run()
}
