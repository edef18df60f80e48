//! Static table of embedded built-ins, generated from `wpp-core/builtins/`
//! (gzip-compressed at image-build time; see `SPEC_FULL.md` §4.1). Each
//! entry records its URI, the gzip-compressed bytes, and the exact
//! uncompressed length so `decompressed()` can verify the inflate output.

pub struct BuiltinSource {
    pub uri: &'static str,
    pub compressed: &'static [u8],
    pub orig_len: usize,
    pub is_dir: bool,
}

pub static BUILTINS: &[BuiltinSource] = &[
    BuiltinSource {
        uri: "/hello.html",
        compressed: include_bytes!("../../builtins/hello.html.gz"),
        orig_len: 96,
        is_dir: false,
    },
    BuiltinSource {
        uri: "/not-found.html",
        compressed: include_bytes!("../../builtins/not-found.html.gz"),
        orig_len: 105,
        is_dir: false,
    },
    BuiltinSource {
        uri: "/include/stddef.h",
        compressed: include_bytes!("../../builtins/include/stddef.h.gz"),
        orig_len: 127,
        is_dir: false,
    },
    BuiltinSource {
        uri: "/include/stdbool.h",
        compressed: include_bytes!("../../builtins/include/stdbool.h.gz"),
        orig_len: 101,
        is_dir: false,
    },
    BuiltinSource {
        uri: "/include/stdarg.h",
        compressed: include_bytes!("../../builtins/include/stdarg.h.gz"),
        orig_len: 232,
        is_dir: false,
    },
    BuiltinSource {
        uri: "/lib/wpp_api.h",
        compressed: include_bytes!("../../builtins/lib/wpp_api.h.gz"),
        orig_len: 276,
        is_dir: false,
    },
    // Directory markers: carry a reserved (empty) compressed pointer per
    // §3 "Built-in entry" so `find("/include")` resolves as a directory
    // during URI-segment walking instead of falling through to the
    // filesystem.
    BuiltinSource { uri: "/include", compressed: &[], orig_len: 0, is_dir: true },
    BuiltinSource { uri: "/lib", compressed: &[], orig_len: 0, is_dir: true },
];
