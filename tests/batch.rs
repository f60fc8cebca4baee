// Integration tests for the batch procedures on temporary files:
//   grid + join outputs, district totals from a keyed table spread over
//   cells, reuse of a service mapping for the vulnerability index and
//   travel times, and cached geocoding without provider calls.

use std::{fs, path::{Path, PathBuf}};

use anyhow::Result;
use geo::{Coord, MultiPolygon, Rect};
use gridjoin::{
    assign_features,
    batch::{self, attach_attributes, attribute_table, read_mapping, travel_times, GRID_FILE, JOIN_FILE, VULN_FILE},
    build_grid,
    config::AttributeTableConfig,
    io::csv::{f64_column, read_csv, read_csv_bytes, str_column, Loaded},
    join::aggregate_with,
    remote::{CachedGeocoder, Directions, Geocoder, JsonCache, LonLat, Lookup},
    AggFn, AggSpec, AssignMode, AttrValue, CellId, Config, FeatureGeometry, FeatureId, FeatureRecord, GridSpec, Projector,
};

fn write(dir: &Path, name: &str, body: &str) -> String {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    path.display().to_string()
}

#[test]
fn grid_and_join_outputs_line_up() {
    let dir = tempfile::tempdir().unwrap();
    let points = write(dir.path(), "crime.csv",
        "lon,lat,kind\n126.978414,37.56668,theft\n126.978414,37.56668,theft\n126.978414,37.56668,fraud\n,,theft\n");
    let text = format!(r#"
        [grid]
        cell_size_m = 250
        radius_m = 250

        [output]
        dir = {out:?}

        [[layer]]
        name = "theft"
        paths = [{points:?}]
        filter = {{ column = "kind", contains = "theft" }}

        [[layer.aggregate]]
        column = "theft_n"
        func = "count"
    "#, out = dir.path().display().to_string());
    let config = Config::from_toml(&text).unwrap();

    batch::write_grid(&config).unwrap();
    batch::write_join(&config).unwrap();

    let grid = read_csv(&dir.path().join(GRID_FILE)).unwrap();
    let joined = read_csv(&dir.path().join(JOIN_FILE)).unwrap();
    assert_eq!(grid.height(), 9);
    assert_eq!(joined.height(), 9);
    assert_eq!(str_column(&grid, "cell_id").unwrap(), str_column(&joined, "cell_id").unwrap());

    let counts = f64_column(&joined, "theft_n").unwrap();
    assert!(counts.iter().all(Option::is_some));
    assert_eq!(counts.iter().flatten().sum::<f64>(), 2.0);
    assert_eq!(counts[4], Some(2.0));
}

#[test]
fn district_totals_are_spread_over_their_cells() {
    let grid = build_grid(
        &GridSpec::centered(Coord { x: 126.977_822_2, y: 37.566_405_6 }, 100.0, 100.0),
        &Projector::seoul().unwrap(),
    ).unwrap();
    let c = grid.cell(CellId(4)).unwrap().center();
    let district = |id: u32, name: &str, min_x: f64, max_x: f64| {
        let rect = Rect::new(Coord { x: c.x + min_x, y: c.y - 150.0 }, Coord { x: c.x + max_x, y: c.y + 150.0 });
        FeatureRecord::new(FeatureId(id), FeatureGeometry::Polygon(MultiPolygon(vec![rect.to_polygon()])))
            .with("SGG_NM", AttrValue::Label(name.into()))
    };
    // Two columns of centres in 중구, one in 종로구
    let mut loaded = Loaded {
        features: vec![district(0, "서울특별시 중구", -150.0, 50.0), district(1, "서울특별시 종로구", 50.0, 150.0)],
        skipped: 0,
    };

    let csv = "자치구,소계_발생\n중구,\"1,200\"\n종로구,300\n강남구,999\n";
    let config = AttributeTableConfig {
        path: PathBuf::from("crime.csv"),
        key: "자치구".into(),
        on: "SGG_NM".into(),
        strip_prefix: Some("서울특별시".into()),
        columns: Vec::new(),
    };
    let table = attribute_table(&read_csv_bytes(csv.as_bytes()).unwrap(), &config).unwrap();
    assert_eq!(attach_attributes(&mut loaded, &table, &config), 0);

    let assignments = assign_features(&grid, &loaded.features, AssignMode::CenterInPolygon).unwrap();
    assert_eq!(assignments.len(), 9);
    let specs = [AggSpec::new("crime", AggFn::EvenShare, Some("소계_발생"))];
    let rows = aggregate_with(&grid, &assignments.rows, &loaded.features, &specs, false).unwrap();

    let shares: Vec<f64> = rows.iter().map(|r| r.values[0].as_number().unwrap()).collect();
    for (cell, share) in grid.cells().iter().zip(&shares) {
        let expected = if cell.i < 2 { 200.0 } else { 100.0 };
        assert!((share - expected).abs() < 1e-9, "cell {} got {share}", cell.id);
    }
    assert!((shares.iter().sum::<f64>() - 1_500.0).abs() < 1e-9);
}

#[test]
fn mapping_feeds_vulnerability_and_travel() {
    let dir = tempfile::tempdir().unwrap();
    let mapping = write(dir.path(), "grid_services.csv",
        "cell_id,center_lon,center_lat,district,service_name,service_lon,service_lat,area_ratio\n\
         0,126.97,37.56,중구;종로구,중부소방서;종로소방서,126.98;126.99,37.56;37.57,0.5;0.5\n\
         1,126.98,37.56,중구,중부소방서,126.98,37.56,1\n\
         2,126.99,37.56,,,,,\n");
    let stations = write(dir.path(), "stations.csv",
        "FRSTT_NM,RRPOP,SNR_POP,BBY_POP,DSB_POP,OPH,FFOFCR_CHR\n\
         중부소방서,1000,100,50,40,200,30\n\
         종로소방서,1000,200,20,60,300,25\n");
    let text = format!(r#"
        [services]
        mapping = {mapping:?}

        [registry]
        stations = {stations:?}

        [output]
        dir = {out:?}
    "#, out = dir.path().display().to_string());
    let config = Config::from_toml(&text).unwrap();

    batch::write_vulnerability(&config).unwrap();
    let vuln = read_csv(&dir.path().join(VULN_FILE)).unwrap();
    let index = f64_column(&vuln, "grid_vuln_index").unwrap();
    assert_eq!(index.len(), 3);
    assert!(index.iter().flatten().all(|v| (0.0..=1.0).contains(v)));
    assert!((index[0].unwrap() - 0.5).abs() < 1e-9);
    assert_eq!(index[1], Some(0.0));
    assert_eq!(index[2], Some(0.0));

    struct Straight;
    impl Directions for Straight {
        fn duration_s(&mut self, origin: LonLat, destination: LonLat) -> Result<Lookup<f64>> {
            Ok(Lookup::Found(((destination.lon - origin.lon).abs() + (destination.lat - origin.lat).abs()) * 10_000.0))
        }
    }
    let cells = read_mapping(&read_csv(Path::new(&mapping)).unwrap(), &config.travel).unwrap();
    let times = travel_times(&cells, &mut Straight).unwrap();
    assert_eq!(times.len(), 3);
    assert!((times[1].unwrap() - 0.0).abs() < 1e-6);
    assert_eq!(times[2], Some(0.0));
}

#[test]
fn cached_address_is_answered_without_calls() {
    struct Counting(usize);
    impl Geocoder for Counting {
        fn geocode(&mut self, _query: &str) -> Result<Lookup<LonLat>> {
            self.0 += 1;
            Ok(Lookup::Found(LonLat::new(126.978, 37.566)))
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let cache_path = dir.path().join("cache/geocode.jsonl");
    {
        let mut cache = JsonCache::open(&cache_path).unwrap();
        cache.insert("서울특별시 중구 세종대로 110", Some(LonLat::new(1.0, 2.0))).unwrap();
    }

    let mut geocoder = CachedGeocoder::new(Counting(0), JsonCache::open(&cache_path).unwrap());
    let found = geocoder.geocode("서울특별시 중구 세종대로 110").unwrap();
    assert_eq!(found, Lookup::Found(LonLat::new(1.0, 2.0)));
    assert_eq!(geocoder.calls(), 0);
}
