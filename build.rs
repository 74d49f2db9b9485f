/// Build script para proyectos ESP-IDF.
///
/// `embuild::espidf::sysenv::output()` propaga al linker la configuración
/// que generó esp-idf-sys (SDK de C, cross-compiler, bindings).
///
/// Solo aplica al target `espidf`: en el host compilamos la librería
/// portable para correr los tests, sin SDK de por medio.
fn main() {
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("espidf") {
        embuild::espidf::sysenv::output();
    }
}
