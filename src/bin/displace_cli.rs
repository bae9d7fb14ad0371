fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    if let Err(err) = native::run() {
        eprintln!("displace_cli error: {err}");
        std::process::exit(1);
    }
}

mod native {
    use ply_displace::geom::Transform;
    use ply_displace::parse::ply::{PlyReader, PropertyKind};
    use ply_displace::parse::ply_mesh::MeshBindings;
    use ply_displace::parse::ppm::RasterImage;
    use ply_displace::shape::{
        BuildReport, HeightFieldTexture, ParamSet, TextureRegistry, TriangleMesh,
        WorldMeshFactory, try_create_displacement_mesh,
    };
    use ply_displace::{HeightField, UvPolicy};
    use std::fmt::Write as _;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    const ALPHA_TEXTURE_NAME: &str = "cli_alpha_map";

    const USAGE: &str = r#"displace_cli (ply-displace)

USAGE:
  displace_cli inspect <mesh.ply>
  displace_cli run --mesh <mesh.ply> --heightmap <image.ppm> [options]

OPTIONS (run):
  --uv-mode <mode>         clamp (default), repeat or reject
  --alpha-map <image.ppm>  Use the luminance of a P6 image as alpha mask
  --reverse-orientation    Flip shading normals
  --obj <path>             Write the displaced world-space mesh as OBJ
  --report <path>          Write the build report as JSON (default: stdout)
  --overwrite              Overwrite existing output files
  -h, --help               Show this help

Set RUST_LOG=debug for parser and build progress.
"#;

    pub fn run() -> Result<(), String> {
        let args: Vec<String> = std::env::args().skip(1).collect();
        let mut args = Args::new(args);

        let Some(command) = args.next() else {
            print_usage();
            return Ok(());
        };

        match command.as_str() {
            "inspect" => cmd_inspect(&mut args),
            "run" => cmd_run(&mut args),
            "-h" | "--help" | "help" => {
                print_usage();
                Ok(())
            }
            other => Err(format!("unknown command `{other}`\n\n{USAGE}")),
        }
    }

    fn print_usage() {
        println!("{USAGE}");
    }

    fn cmd_inspect(args: &mut Args) -> Result<(), String> {
        let path = PathBuf::from(args.next().ok_or("missing mesh path")?);
        let reader = PlyReader::open(&path).map_err(|e| format!("{}: {e}", path.display()))?;
        let header = reader.header();

        println!("file: {}", path.display());
        println!("format: {} {}", header.format.name(), header.version);
        for comment in &header.comments {
            println!("comment: {comment}");
        }
        for element in &header.elements {
            println!("element {} ({})", element.name, element.count);
            for prop in &element.properties {
                let marker = match prop.kind {
                    PropertyKind::List { .. } => "list",
                    PropertyKind::Scalar(_) => "scalar",
                };
                println!("  {:<18} {:<8} {}", prop.name, marker, prop.kind);
            }
        }

        match MeshBindings::discover(header) {
            Ok(bindings) => {
                println!(
                    "mesh: vertices={} faces={} normals={} uvs={} face_list={} tags={}",
                    bindings.vertex_count,
                    bindings.face_count,
                    bindings.has_normals,
                    bindings
                        .uv_names
                        .as_ref()
                        .map_or_else(|| "none".to_string(), |(u, v)| format!("{u}/{v}")),
                    bindings.face_list_name,
                    bindings.has_face_tags
                );
                Ok(())
            }
            Err(err) => {
                println!("mesh: not usable ({err})");
                Ok(())
            }
        }
    }

    fn cmd_run(args: &mut Args) -> Result<(), String> {
        let mut mesh_path: Option<String> = None;
        let mut height_path: Option<String> = None;
        let mut uv_mode: Option<UvPolicy> = None;
        let mut alpha_path: Option<PathBuf> = None;
        let mut reverse_orientation = false;
        let mut obj_path: Option<PathBuf> = None;
        let mut report_path: Option<PathBuf> = None;
        let mut overwrite = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--mesh" => mesh_path = Some(args.value("--mesh")?),
                "--heightmap" => height_path = Some(args.value("--heightmap")?),
                "--uv-mode" => uv_mode = Some(args.value("--uv-mode")?.parse()?),
                "--alpha-map" => alpha_path = Some(PathBuf::from(args.value("--alpha-map")?)),
                "--reverse-orientation" => reverse_orientation = true,
                "--obj" => obj_path = Some(PathBuf::from(args.value("--obj")?)),
                "--report" => report_path = Some(PathBuf::from(args.value("--report")?)),
                "--overwrite" => overwrite = true,
                "-h" | "--help" => {
                    print_usage();
                    return Ok(());
                }
                other => return Err(format!("unknown option `{other}`\n\n{USAGE}")),
            }
        }

        let mesh_path = mesh_path.ok_or("missing --mesh")?;
        let height_path = height_path.ok_or("missing --heightmap")?;

        let mut params = ParamSet::new();
        params.insert_filename("filename", mesh_path);
        params.insert_filename("displacementmap", height_path);
        if let Some(mode) = uv_mode {
            params.insert("uvmode", mode.name());
        }

        let mut textures = TextureRegistry::new();
        if let Some(path) = alpha_path.as_deref() {
            let image = RasterImage::load(path).map_err(|e| e.to_string())?;
            let texture = HeightFieldTexture::new(HeightField::from_raster(&image));
            textures.insert(ALPHA_TEXTURE_NAME.to_string(), Arc::new(texture));
            params.insert_texture("alpha", ALPHA_TEXTURE_NAME);
        }

        let mut factory = WorldMeshFactory::new();
        let build = try_create_displacement_mesh(
            &Transform::identity(),
            &Transform::identity(),
            reverse_orientation,
            &params,
            &textures,
            &mut factory,
        )
        .map_err(|e| format!("{e} [{:?}]", e.kind()))?;

        if let Some(path) = obj_path.as_deref() {
            let mesh = factory
                .meshes()
                .first()
                .ok_or("factory produced no mesh")?;
            write_obj_file(path, mesh, "displaced", overwrite)?;
            eprintln!("wrote {}", path.display());
        }

        let json = report_json(&build.report)?;
        if let Some(path) = report_path.as_deref() {
            write_text_file(path, &json, overwrite)?;
            eprintln!("wrote {}", path.display());
        } else {
            println!("{json}");
        }

        let d = &build.report.displacement;
        eprintln!(
            "displaced: vertices={} triangles={} displacement=[{:.4}, {:.4}] avg={:.4} warnings={}",
            build.report.vertex_count,
            build.report.triangle_count,
            d.min_displacement_applied,
            d.max_displacement_applied,
            d.avg_displacement_applied,
            build.report.warnings.len()
        );

        Ok(())
    }

    fn report_json(report: &BuildReport) -> Result<String, String> {
        serde_json::to_string_pretty(report).map_err(|e| format!("serialize report: {e}"))
    }

    fn ensure_writable(path: &Path, overwrite: bool) -> Result<(), String> {
        if path.exists() && !overwrite {
            return Err(format!(
                "refusing to overwrite existing file {} (use --overwrite)",
                path.display()
            ));
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| format!("create dir {}: {e}", parent.display()))?;
        }
        Ok(())
    }

    fn write_text_file(path: &Path, text: &str, overwrite: bool) -> Result<(), String> {
        ensure_writable(path, overwrite)?;
        let mut text = text.replace("\r\n", "\n");
        if !text.ends_with('\n') {
            text.push('\n');
        }
        fs::write(path, text).map_err(|e| format!("write {}: {e}", path.display()))
    }

    fn write_obj_file(path: &Path, mesh: &TriangleMesh, name: &str, overwrite: bool) -> Result<(), String> {
        let text = obj_text(mesh, name)?;
        write_text_file(path, &text, overwrite)
    }

    /// Renders the world-space mesh as Wavefront OBJ. Vertex, texture and
    /// normal streams share one index, so every face corner reuses it.
    fn obj_text(mesh: &TriangleMesh, name: &str) -> Result<String, String> {
        let vertex_count = mesh.positions.len();
        let mut out = format!(
            "# ply-displace displace_cli\n# {} vertices, {} triangles\no {name}\n",
            vertex_count,
            mesh.triangle_count()
        );

        for p in &mesh.positions {
            let _ = writeln!(out, "v {} {} {}", p.x, p.y, p.z);
        }
        for [u, v] in mesh.uvs.iter().flatten() {
            let _ = writeln!(out, "vt {u} {v}");
        }
        for n in mesh.normals.iter().flatten() {
            let _ = writeln!(out, "vn {} {} {}", n.x, n.y, n.z);
        }

        let corner = |i: usize| {
            let i = i + 1;
            match (mesh.uvs.is_some(), mesh.normals.is_some()) {
                (true, true) => format!("{i}/{i}/{i}"),
                (true, false) => format!("{i}/{i}"),
                (false, true) => format!("{i}//{i}"),
                (false, false) => i.to_string(),
            }
        };
        for triangle in 0..mesh.triangle_count() {
            let corners = mesh
                .vertex_indices(triangle)
                .filter(|c| c.iter().all(|&i| i < vertex_count))
                .ok_or_else(|| format!("triangle {triangle} references a missing vertex"))?;
            let [a, b, c] = corners.map(corner);
            let _ = writeln!(out, "f {a} {b} {c}");
        }
        Ok(out)
    }

    struct Args {
        args: Vec<String>,
        pos: usize,
    }

    impl Args {
        fn new(args: Vec<String>) -> Self {
            Self { args, pos: 0 }
        }

        fn next(&mut self) -> Option<String> {
            let arg = self.args.get(self.pos)?.clone();
            self.pos += 1;
            Some(arg)
        }

        fn value(&mut self, flag: &str) -> Result<String, String> {
            self.next()
                .ok_or_else(|| format!("missing value for {flag}"))
        }
    }

}
